// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod progress;
pub mod server;
pub mod types;

use anyhow::{Context, Result, anyhow, bail};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::cli::{CallArgs, CliArgs, Command, RunArgs};
use crate::config::ConfigFile;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::errors::BridgeError;
use crate::exec::{
    ExecutionResult, FallbackController, InvocationEvent, InvocationRunner, Outcome,
    ProcessSupervisor, SpawnRequest,
};
use crate::progress::{EstimatorSpec, RUNNING_CEILING};
use crate::server::{ServerManager, ServerRequest};
use crate::types::GrammarKind;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - supervisor / fallback controller for `run`
/// - persistent server manager for `call`
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    match args.command {
        Command::Check => {
            print_check(&cfg);
            Ok(())
        }
        Command::Run(run_args) => run_tool(&cfg, run_args).await,
        Command::Call(call_args) => call_server(&cfg, call_args).await,
    }
}

async fn run_tool(cfg: &ConfigFile, args: RunArgs) -> Result<()> {
    let tool = cfg
        .tool
        .get(&args.tool)
        .ok_or_else(|| BridgeError::UnknownTool(args.tool.clone()))?;

    let mut request = SpawnRequest::new(&tool.binary, args.args.iter().cloned())
        .with_grammar(tool.grammar);
    if let Some(id) = &args.id {
        request = request.with_id(id.as_str());
    }
    if let Some(duration) = args.duration {
        request = request.with_total_duration(duration);
        // Tools without usable native progress get a wall-clock estimate.
        // The speech engine reports load milestones, then goes quiet while
        // transcribing.
        match tool.grammar {
            GrammarKind::Silent => {
                request = request.with_estimator(EstimatorSpec::new(
                    duration,
                    1.0,
                    0.0,
                    RUNNING_CEILING,
                ));
            }
            GrammarKind::Speech => {
                request = request.with_estimator(
                    EstimatorSpec::new(duration, 1.0, 0.0, RUNNING_CEILING)
                        .start_on_phase("Transcribing"),
                );
            }
            _ => {}
        }
    }
    match &args.artifact {
        Some(path) => request = request.with_artifact(path),
        None if tool.requires_artifact => {
            bail!("tool {} requires --artifact", args.tool);
        }
        None => {}
    }

    let supervisor = ProcessSupervisor::new(cfg.supervisor.clone());
    let (done_tx, printer) = spawn_printer(supervisor.subscribe());

    {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            supervisor.abort_all();
        });
    }

    let result = if tool.accelerated {
        let controller = FallbackController::new(supervisor.clone(), cfg.fallback.clone())?;
        let mut notices = controller.subscribe();
        tokio::spawn(async move {
            while let Ok(notice) = notices.recv().await {
                println!(
                    "[{}] accelerated mode failed; retrying in safe mode as {}",
                    notice.failed_id, notice.retry_id
                );
            }
        });
        info!(mode = %controller.effective_mode(args.preference()), tool = %args.tool, "running tool");
        controller.run(request, args.preference()).await
    } else {
        info!(tool = %args.tool, "running tool");
        supervisor.run(request).await
    };

    let _ = done_tx.send(());
    let _ = printer.await;

    report(result?)
}

/// Print broadcast events until told to stop, then drain what is buffered.
fn spawn_printer(
    mut events: broadcast::Receiver<InvocationEvent>,
) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(event) => print_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "progress printer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut done_rx => {
                    while let Ok(event) = events.try_recv() {
                        print_event(&event);
                    }
                    break;
                }
            }
        }
    });
    (done_tx, handle)
}

fn print_event(event: &InvocationEvent) {
    match event {
        InvocationEvent::Progress(p) => {
            let mut line = format!("[{}] {:5.1}%", p.id, p.percent);
            if let Some(rate) = &p.rate {
                line.push_str(&format!("  {rate}"));
            }
            if let Some(eta) = p.eta {
                line.push_str(&format!("  eta {}s", eta.as_secs()));
            }
            println!("{line}");
        }
        InvocationEvent::Phase { id, label } => println!("[{id}] {label}"),
        InvocationEvent::Completed(_) => {}
    }
}

fn report(result: ExecutionResult) -> Result<()> {
    let secs = result.duration.as_secs_f64();
    match result.outcome {
        Outcome::Succeeded => {
            println!("[{}] done in {secs:.1}s", result.id);
            Ok(())
        }
        Outcome::Aborted => {
            println!("[{}] aborted after {secs:.1}s", result.id);
            Err(anyhow!("invocation {} was aborted", result.id))
        }
        Outcome::Failed => Err(anyhow!(
            "invocation {} failed: {}",
            result.id,
            result.error.unwrap_or_default()
        )),
    }
}

async fn call_server(cfg: &ConfigFile, args: CallArgs) -> Result<()> {
    let server_cfg = cfg
        .server
        .clone()
        .ok_or_else(|| BridgeError::ConfigError("no [server] section configured".into()))?;
    let body = args
        .body
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("parsing --body as JSON")?;
    let default_method = if body.is_some() { "POST" } else { "GET" };
    let method = args.method.unwrap_or_else(|| default_method.to_string());
    let request = ServerRequest {
        method,
        path: args.path,
        body,
    };

    let manager = ServerManager::new(server_cfg)?;
    let result = tokio::select! {
        result = manager.call(request) => result,
        _ = tokio::signal::ctrl_c() => Err(BridgeError::StartCancelled),
    };
    manager.stop();

    let response = result?;
    println!("{}", response.body);
    if !response.is_success() {
        bail!("server returned HTTP {}", response.status);
    }
    Ok(())
}

/// Summary of the validated config, without executing anything.
fn print_check(cfg: &ConfigFile) {
    println!("mediabridge config check");
    println!(
        "  supervisor: error_tail_chars = {}, abort_grace = {:?}, drain_timeout = {:?}",
        cfg.supervisor.error_tail_chars, cfg.supervisor.abort_grace, cfg.supervisor.drain_timeout
    );
    println!(
        "  fallback: {} signatures, multipliers accelerated = {}, safe = {}",
        cfg.fallback.signatures.len(),
        cfg.fallback.accelerated_multiplier,
        cfg.fallback.safe_multiplier
    );
    match &cfg.server {
        Some(server) => {
            println!("  server: {} (listening on {})", server.binary, server.base_url());
            println!("      ready when output contains: {:?}", server.readiness_marker);
            println!(
                "      startup_timeout = {:?}, request_timeout = {:?}, idle_timeout = {:?}",
                server.startup_timeout, server.request_timeout, server.idle_timeout
            );
        }
        None => println!("  server: none"),
    }
    println!();

    println!("tools ({}):", cfg.tool.len());
    for (name, tool) in cfg.tool.iter() {
        println!("  - {name}");
        println!("      binary: {}", tool.binary);
        println!("      grammar: {:?}", tool.grammar);
        if tool.requires_artifact {
            println!("      requires_artifact: true");
        }
        if tool.accelerated {
            println!("      accelerated: true");
        }
    }

    debug!("config check complete (no execution)");
}
