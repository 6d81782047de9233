// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::GrammarKind;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [supervisor]
/// error_tail_chars = 500
/// abort_grace = "3s"
///
/// [fallback]
/// accelerated_args = []
/// safe_args = ["--no-gpu"]
///
/// [server]
/// binary = "/opt/llama/llama-server"
/// args = ["--port", "{port}", "-m", "model.gguf"]
/// readiness_marker = "server is listening"
///
/// [tool.ffmpeg]
/// binary = "/usr/bin/ffmpeg"
/// grammar = "transcoder"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub supervisor: RawSupervisorSection,

    #[serde(default)]
    pub fallback: RawFallbackSection,

    /// The persistent text-generation server, if any.
    #[serde(default)]
    pub server: Option<RawServerSection>,

    /// All tools from `[tool.<name>]`, keyed by tool name.
    #[serde(default)]
    pub tool: BTreeMap<String, ToolConfig>,
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSupervisorSection {
    /// How much trailing stderr to keep for failure messages.
    #[serde(default = "default_error_tail_chars")]
    pub error_tail_chars: usize,

    /// Time between the cooperative terminate and the forced kill.
    #[serde(default = "default_abort_grace")]
    pub abort_grace: String,

    /// Upper bound on waiting for output readers once the process exited.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,
}

fn default_error_tail_chars() -> usize {
    500
}

fn default_abort_grace() -> String {
    "3s".to_string()
}

fn default_drain_timeout() -> String {
    "2s".to_string()
}

impl Default for RawSupervisorSection {
    fn default() -> Self {
        Self {
            error_tail_chars: default_error_tail_chars(),
            abort_grace: default_abort_grace(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

/// `[fallback]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFallbackSection {
    /// Regexes matched against captured error text. `None` uses the
    /// built-in driver/device signature set.
    #[serde(default)]
    pub signatures: Option<Vec<String>>,

    #[serde(default = "default_accelerated_multiplier")]
    pub accelerated_multiplier: f64,

    #[serde(default = "default_safe_multiplier")]
    pub safe_multiplier: f64,

    /// Appended to the argument vector in accelerated mode.
    #[serde(default)]
    pub accelerated_args: Vec<String>,

    /// Appended to the argument vector in safe mode.
    #[serde(default)]
    pub safe_args: Vec<String>,
}

fn default_accelerated_multiplier() -> f64 {
    0.5
}

fn default_safe_multiplier() -> f64 {
    1.5
}

impl Default for RawFallbackSection {
    fn default() -> Self {
        Self {
            signatures: None,
            accelerated_multiplier: default_accelerated_multiplier(),
            safe_multiplier: default_safe_multiplier(),
            accelerated_args: Vec::new(),
            safe_args: Vec::new(),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawServerSection {
    pub binary: String,

    /// Launch arguments; every `{port}` is replaced with the bound port.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Substring in the server output that signals readiness.
    pub readiness_marker: String,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_startup_timeout() -> String {
    "120s".to_string()
}

fn default_request_timeout() -> String {
    "120s".to_string()
}

fn default_idle_timeout() -> String {
    "5m".to_string()
}

/// `[tool.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    /// Absolute path (or PATH-resolvable name) of the executable.
    pub binary: String,

    #[serde(default)]
    pub grammar: GrammarKind,

    /// Whether a zero exit code must be backed by an output file.
    #[serde(default)]
    pub requires_artifact: bool,

    /// Route invocations through the fallback controller.
    #[serde(default)]
    pub accelerated: bool,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub supervisor: SupervisorConfig,
    pub fallback: FallbackConfig,
    pub server: Option<ServerConfig>,
    pub tool: BTreeMap<String, ToolConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        supervisor: SupervisorConfig,
        fallback: FallbackConfig,
        server: Option<ServerConfig>,
        tool: BTreeMap<String, ToolConfig>,
    ) -> Self {
        Self {
            supervisor,
            fallback,
            server,
            tool,
        }
    }
}

/// Typed settings for the one-shot process supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub error_tail_chars: usize,
    pub abort_grace: Duration,
    pub drain_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            error_tail_chars: default_error_tail_chars(),
            abort_grace: Duration::from_secs(3),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// Driver, device and backend failures that justify a safe-mode retry.
pub const DEFAULT_FALLBACK_SIGNATURES: &[&str] = &[
    r"GGML_ASSERT",
    r"(?i)ggml_(cuda|metal|vk|vulkan|hip|sycl)",
    r"(?i)cuda error|cublas|cudaMalloc",
    r"(?i)vulkan|vk::|VK_ERROR",
    r"(?i)\bmetal\b.*(error|fail)",
    r"(?i)hipError|rocm",
    r"(?i)out of memory|failed to allocate",
    r"(?i)device lost|device_lost",
    r"(?i)illegal memory access",
    r"(?i)no (cuda|gpu|compatible) device",
];

/// Typed settings for the fallback controller.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub signatures: Vec<String>,
    pub accelerated_multiplier: f64,
    pub safe_multiplier: f64,
    pub accelerated_args: Vec<String>,
    pub safe_args: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_FALLBACK_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            accelerated_multiplier: default_accelerated_multiplier(),
            safe_multiplier: default_safe_multiplier(),
            accelerated_args: Vec::new(),
            safe_args: Vec::new(),
        }
    }
}

/// Typed settings for the persistent server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub binary: String,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub readiness_marker: String,
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
}

impl ServerConfig {
    /// Server config with default host, port and timeouts.
    pub fn new(binary: impl Into<String>, readiness_marker: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            host: default_host(),
            port: default_port(),
            readiness_marker: readiness_marker.into(),
            startup_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(5 * 60),
        }
    }

    /// Launch arguments with `{port}` substituted.
    pub fn resolved_args(&self) -> Vec<String> {
        let port = self.port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
