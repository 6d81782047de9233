// tests/config_loading.rs

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;

use mediabridge::config::load_and_validate;
use mediabridge::errors::BridgeError;
use mediabridge::types::GrammarKind;
use mediabridge_test_utils::builders::{ConfigFileBuilder, ToolConfigBuilder};

#[test]
fn demo_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/Mediabridge.toml");
    let cfg = load_and_validate(&path).expect("demo config should be valid");

    assert_eq!(cfg.supervisor.error_tail_chars, 800);
    assert_eq!(cfg.fallback.safe_args, ["--no-gpu"]);
    assert!(!cfg.fallback.signatures.is_empty());

    let server = cfg.server.expect("server section");
    assert_eq!(server.port, 8089);
    assert_eq!(server.request_timeout, Duration::from_secs(90));
    assert_eq!(server.idle_timeout, Duration::from_secs(300));
    assert_eq!(
        server.resolved_args(),
        ["--port", "8089", "-m", "models/model.gguf"]
    );

    assert_eq!(cfg.tool.len(), 5);
    assert_eq!(cfg.tool["transcribe"].grammar, GrammarKind::Speech);
    assert!(cfg.tool["transcribe"].accelerated);
    assert_eq!(cfg.tool["analyze"].grammar, GrammarKind::JsonLines);
    assert_eq!(cfg.tool["probe"].grammar, GrammarKind::Silent);
}

#[test]
fn invalid_signature_returns_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[fallback]
signatures = ["cuda(", "GGML_ASSERT"]
"#
    )
    .unwrap();

    match load_and_validate(file.path()) {
        Err(BridgeError::ConfigError(msg)) => assert!(msg.contains("cuda("), "{msg}"),
        other => panic!("expected ConfigError, got: {other:?}"),
    }
}

#[test]
fn bad_duration_returns_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[supervisor]
abort_grace = "soon"
"#
    )
    .unwrap();

    assert!(matches!(
        load_and_validate(file.path()),
        Err(BridgeError::ConfigError(_))
    ));
}

#[test]
fn unknown_grammar_is_a_toml_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[tool.x]
binary = "x"
grammar = "teletype"
"#
    )
    .unwrap();

    assert!(matches!(
        load_and_validate(file.path()),
        Err(BridgeError::TomlError(_))
    ));
}

#[test]
fn builder_produces_validated_config() {
    let cfg = ConfigFileBuilder::new()
        .with_tool(
            "transcribe",
            ToolConfigBuilder::new("whisper-cli")
                .grammar(GrammarKind::Speech)
                .accelerated(true)
                .build(),
        )
        .with_server("llama-server", "listening")
        .with_abort_grace("250ms")
        .with_safe_args(&["--no-gpu"])
        .build();

    assert_eq!(cfg.supervisor.abort_grace, Duration::from_millis(250));
    assert!(cfg.tool["transcribe"].accelerated);
    assert_eq!(cfg.server.unwrap().readiness_marker, "listening");
}
