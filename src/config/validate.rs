// src/config/validate.rs

use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, FallbackConfig, RawConfigFile, RawFallbackSection, RawServerSection,
    RawSupervisorSection, ServerConfig, SupervisorConfig, ToolConfig,
};
use crate::errors::{BridgeError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = BridgeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let supervisor = validate_supervisor(&raw.supervisor)?;
        let fallback = validate_fallback(raw.fallback)?;
        let server = raw.server.map(validate_server).transpose()?;
        validate_tools(&raw.tool)?;
        Ok(ConfigFile::new_unchecked(supervisor, fallback, server, raw.tool))
    }
}

fn duration_field(section: &str, field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value).map_err(|e| {
        BridgeError::ConfigError(format!("[{section}].{field} = \"{value}\": {e}"))
    })
}

fn validate_supervisor(raw: &RawSupervisorSection) -> Result<SupervisorConfig> {
    if raw.error_tail_chars == 0 {
        return Err(BridgeError::ConfigError(
            "[supervisor].error_tail_chars must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(SupervisorConfig {
        error_tail_chars: raw.error_tail_chars,
        abort_grace: duration_field("supervisor", "abort_grace", &raw.abort_grace)?,
        drain_timeout: duration_field("supervisor", "drain_timeout", &raw.drain_timeout)?,
    })
}

fn validate_fallback(raw: RawFallbackSection) -> Result<FallbackConfig> {
    for (field, value) in [
        ("accelerated_multiplier", raw.accelerated_multiplier),
        ("safe_multiplier", raw.safe_multiplier),
    ] {
        if !(value.is_finite() && value > 0.0) {
            return Err(BridgeError::ConfigError(format!(
                "[fallback].{field} must be a positive number (got {value})"
            )));
        }
    }

    let defaults = FallbackConfig::default();
    let signatures = raw.signatures.unwrap_or(defaults.signatures);
    for pattern in &signatures {
        if let Err(e) = Regex::new(pattern) {
            return Err(BridgeError::ConfigError(format!(
                "[fallback].signatures contains an invalid regex '{pattern}': {e}"
            )));
        }
    }

    Ok(FallbackConfig {
        signatures,
        accelerated_multiplier: raw.accelerated_multiplier,
        safe_multiplier: raw.safe_multiplier,
        accelerated_args: raw.accelerated_args,
        safe_args: raw.safe_args,
    })
}

fn validate_server(raw: RawServerSection) -> Result<ServerConfig> {
    if raw.binary.trim().is_empty() {
        return Err(BridgeError::ConfigError(
            "[server].binary must not be empty".to_string(),
        ));
    }
    if raw.readiness_marker.is_empty() {
        return Err(BridgeError::ConfigError(
            "[server].readiness_marker must not be empty".to_string(),
        ));
    }

    Ok(ServerConfig {
        startup_timeout: duration_field("server", "startup_timeout", &raw.startup_timeout)?,
        request_timeout: duration_field("server", "request_timeout", &raw.request_timeout)?,
        idle_timeout: duration_field("server", "idle_timeout", &raw.idle_timeout)?,
        binary: raw.binary,
        args: raw.args,
        host: raw.host,
        port: raw.port,
        readiness_marker: raw.readiness_marker,
    })
}

fn validate_tools(tools: &std::collections::BTreeMap<String, ToolConfig>) -> Result<()> {
    for (name, tool) in tools.iter() {
        if tool.binary.trim().is_empty() {
            return Err(BridgeError::ConfigError(format!(
                "tool '{}' has an empty `binary`",
                name
            )));
        }
    }
    Ok(())
}
