#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use mediabridge::config::{
    ConfigFile, RawConfigFile, RawServerSection, ServerConfig, SupervisorConfig, ToolConfig,
};
use mediabridge::exec::SpawnRequest;
use mediabridge::types::GrammarKind;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_tool(mut self, name: &str, tool: ToolConfig) -> Self {
        self.config.tool.insert(name.to_string(), tool);
        self
    }

    pub fn with_server(mut self, binary: &str, marker: &str) -> Self {
        self.config.server = Some(RawServerSection {
            binary: binary.to_string(),
            args: vec![],
            host: "127.0.0.1".to_string(),
            port: 8080,
            readiness_marker: marker.to_string(),
            startup_timeout: "120s".to_string(),
            request_timeout: "120s".to_string(),
            idle_timeout: "5m".to_string(),
        });
        self
    }

    pub fn with_abort_grace(mut self, grace: &str) -> Self {
        self.config.supervisor.abort_grace = grace.to_string();
        self
    }

    pub fn with_safe_args(mut self, args: &[&str]) -> Self {
        self.config.fallback.safe_args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ToolConfig`.
pub struct ToolConfigBuilder {
    tool: ToolConfig,
}

impl ToolConfigBuilder {
    pub fn new(binary: &str) -> Self {
        Self {
            tool: ToolConfig {
                binary: binary.to_string(),
                grammar: GrammarKind::Silent,
                requires_artifact: false,
                accelerated: false,
            },
        }
    }

    pub fn grammar(mut self, grammar: GrammarKind) -> Self {
        self.tool.grammar = grammar;
        self
    }

    pub fn requires_artifact(mut self, val: bool) -> Self {
        self.tool.requires_artifact = val;
        self
    }

    pub fn accelerated(mut self, val: bool) -> Self {
        self.tool.accelerated = val;
        self
    }

    pub fn build(self) -> ToolConfig {
        self.tool
    }
}

/// Supervisor settings with short timeouts so tests don't wait on
/// production grace periods.
pub fn fast_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        error_tail_chars: 500,
        abort_grace: Duration::from_millis(500),
        drain_timeout: Duration::from_millis(500),
    }
}

/// Request that runs `script` through `sh -c`.
pub fn sh(script: &str) -> SpawnRequest {
    SpawnRequest::new("sh", ["-c", script])
}

/// Server config that runs `script` through `sh -c` with short timeouts.
pub fn sh_server(script: &str, marker: &str, port: u16) -> ServerConfig {
    let mut cfg = ServerConfig::new("sh", marker);
    cfg.args = vec!["-c".to_string(), script.to_string()];
    cfg.port = port;
    cfg.startup_timeout = Duration::from_secs(5);
    cfg.request_timeout = Duration::from_secs(2);
    cfg.idle_timeout = Duration::from_secs(60);
    cfg
}

pub fn tools(entries: &[(&str, ToolConfig)]) -> BTreeMap<String, ToolConfig> {
    entries
        .iter()
        .map(|(name, tool)| (name.to_string(), tool.clone()))
        .collect()
}
