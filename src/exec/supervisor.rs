// src/exec/supervisor.rs

//! One-shot process supervision.
//!
//! `ProcessSupervisor::spawn` starts an external tool, registers it, wires
//! both output pipes through the tool's progress grammar and returns an
//! [`Invocation`] handle. A per-invocation monitor task waits for exit (or an
//! abort request), drains the readers, resolves the [`ExecutionResult`],
//! deregisters the record and publishes `Completed` as the final event.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use regex::RegexSet;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::progress::{EstimatorSpec, ProgressTracker, StreamKind, TimeEstimator, grammar_for};
use crate::types::{GrammarKind, InvocationId};

use super::events::{EventSink, InvocationEvent};
use super::registry::{AbortMark, ProcessRecord, RecordSnapshot, Registry};
use super::result::ExecutionResult;
use super::signature::SignatureScan;
use super::spawn_error::SpawnError;
use super::tail::TailBuffer;
use super::terminate;

const READ_CHUNK: usize = 8 * 1024;
const FANOUT_CAPACITY: usize = 256;

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Caller-chosen id; a ULID is generated when absent.
    pub id: Option<InvocationId>,
    pub grammar: GrammarKind,
    /// Length of the media in seconds, for percent calculation.
    pub total_duration: Option<f64>,
    /// File that must exist after a zero exit for the run to count as a
    /// success.
    pub artifact: Option<PathBuf>,
    /// Fill silent phases with wall-clock estimates.
    pub estimator: Option<EstimatorSpec>,
    /// Stderr lines matching any of these are recorded on the result as
    /// `matched_signature`.
    pub fault_signatures: Option<Arc<RegexSet>>,
    /// Directories prepended to the platform's dynamic-library search path.
    pub library_paths: Vec<PathBuf>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Everything needed to launch one invocation.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub command: String,
    pub args: Vec<String>,
    pub options: SpawnOptions,
}

impl SpawnRequest {
    pub fn new(command: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            options: SpawnOptions::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<InvocationId>) -> Self {
        self.options.id = Some(id.into());
        self
    }

    pub fn with_grammar(mut self, grammar: GrammarKind) -> Self {
        self.options.grammar = grammar;
        self
    }

    pub fn with_total_duration(mut self, seconds: f64) -> Self {
        self.options.total_duration = Some(seconds);
        self
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.artifact = Some(path.into());
        self
    }

    pub fn with_estimator(mut self, spec: EstimatorSpec) -> Self {
        self.options.estimator = Some(spec);
        self
    }

    pub fn with_fault_signatures(mut self, signatures: Arc<RegexSet>) -> Self {
        self.options.fault_signatures = Some(signatures);
        self
    }
}

/// Handle to a running invocation.
#[derive(Debug)]
pub struct Invocation {
    id: InvocationId,
    events: mpsc::UnboundedReceiver<InvocationEvent>,
    result: oneshot::Receiver<ExecutionResult>,
}

impl Invocation {
    pub fn id(&self) -> &InvocationId {
        &self.id
    }

    /// Next event for this invocation; `None` once the stream is closed.
    pub async fn next_event(&mut self) -> Option<InvocationEvent> {
        self.events.recv().await
    }

    /// Wait for the terminal result.
    pub async fn wait(self) -> ExecutionResult {
        let id = self.id;
        match self.result.await {
            Ok(result) => result,
            Err(_) => ExecutionResult::failed(
                id,
                None,
                Duration::ZERO,
                "supervisor dropped the invocation before it finished",
            ),
        }
    }

    /// Collect every event up to and including `Completed`, then return the
    /// events together with the result.
    pub async fn collect(mut self) -> (Vec<InvocationEvent>, ExecutionResult) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            let done = matches!(event, InvocationEvent::Completed(_));
            events.push(event);
            if done {
                break;
            }
        }
        let result = self.wait().await;
        (events, result)
    }
}

/// Spawns and tracks one-shot tool invocations.
///
/// Cheap to clone; clones share the registry and the broadcast channel.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    registry: Registry,
    config: Arc<SupervisorConfig>,
    fanout: broadcast::Sender<InvocationEvent>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            registry: Registry::new(),
            config: Arc::new(config),
            fanout,
        }
    }

    /// Receive events from every invocation started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<InvocationEvent> {
        self.fanout.subscribe()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_active(&self, id: &InvocationId) -> bool {
        self.registry.contains(id)
    }

    pub fn snapshot(&self, id: &InvocationId) -> Option<RecordSnapshot> {
        self.registry.snapshot(id)
    }

    /// Launch `request`.
    ///
    /// The record is in the registry before this returns, so an `abort`
    /// issued right after always finds it. Must be called from within a
    /// Tokio runtime.
    pub fn spawn(&self, request: SpawnRequest) -> Result<Invocation, SpawnError> {
        let SpawnRequest {
            command,
            args,
            options,
        } = request;
        let id = options.id.clone().unwrap_or_else(InvocationId::generate);
        if self.registry.contains(&id) {
            return Err(SpawnError::InvocationInUse { id });
        }

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        apply_library_paths(&mut cmd, &options.library_paths);
        terminate::isolate(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::classify(&command, e))?;
        let pid = child.id();

        let grammar = grammar_for(options.grammar, options.total_duration);
        let tracker = Arc::new(Mutex::new(ProgressTracker::new(
            id.clone(),
            grammar,
            options.total_duration,
        )));
        let (abort_tx, abort_rx) = oneshot::channel();

        let record = ProcessRecord::new(
            id.clone(),
            pid,
            command.clone(),
            args.clone(),
            Arc::clone(&tracker),
            abort_tx,
        );
        if self.registry.insert(record).is_err() {
            // Lost a race with a concurrent spawn using the same id.
            let _ = child.start_kill();
            return Err(SpawnError::InvocationInUse { id });
        }

        info!(invocation = %id, pid, command = %command, ?args, "spawned tool process");

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let sink = EventSink::new(local_tx, self.fanout.clone());
        let tail = Arc::new(Mutex::new(TailBuffer::new(self.config.error_tail_chars)));
        let signature_hit = Arc::new(Mutex::new(None));
        let scan = options
            .fault_signatures
            .map(|set| SignatureScan::new(set, Arc::clone(&signature_hit)));

        let readers: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|out| {
                spawn_reader(out, StreamKind::Stdout, Arc::clone(&tracker), sink.clone(), None, None)
            }),
            child.stderr.take().map(|err| {
                spawn_reader(
                    err,
                    StreamKind::Stderr,
                    Arc::clone(&tracker),
                    sink.clone(),
                    Some(Arc::clone(&tail)),
                    scan,
                )
            }),
        ]
        .into_iter()
        .flatten()
        .collect();

        let estimator = options
            .estimator
            .map(|spec| TimeEstimator::new(spec).spawn(Arc::clone(&tracker), sink.clone()));

        let monitor = Monitor {
            id: id.clone(),
            registry: self.registry.clone(),
            config: Arc::clone(&self.config),
            tracker,
            sink,
            tail,
            signature_hit,
            readers,
            estimator,
            artifact: options.artifact,
            started: Instant::now(),
        };
        tokio::spawn(monitor.run(child, abort_rx, result_tx));

        Ok(Invocation {
            id,
            events: local_rx,
            result: result_rx,
        })
    }

    /// Request termination of `id`.
    ///
    /// Returns `false` if `id` is not running. Repeated calls on a live id
    /// return `true` without sending a second request. Does not wait for the
    /// process to exit; the `Aborted` result signals that.
    pub fn abort(&self, id: &InvocationId) -> bool {
        match self.registry.mark_aborted(id) {
            AbortMark::NotFound => false,
            AbortMark::AlreadyAborted => {
                debug!(invocation = %id, "abort already requested");
                true
            }
            AbortMark::Marked(tx) => {
                info!(invocation = %id, "abort requested");
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
                true
            }
        }
    }

    /// Abort every registered invocation without waiting for any of them.
    pub fn abort_all(&self) {
        let ids = self.registry.ids();
        if !ids.is_empty() {
            info!(count = ids.len(), "aborting all invocations");
        }
        for id in ids {
            self.abort(&id);
        }
    }
}

fn apply_library_paths(cmd: &mut Command, paths: &[PathBuf]) {
    if paths.is_empty() {
        return;
    }
    let var = if cfg!(windows) {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    };

    let mut all: Vec<PathBuf> = paths.to_vec();
    if let Some(existing) = std::env::var_os(var) {
        all.extend(std::env::split_paths(&existing));
    }
    match std::env::join_paths(all) {
        Ok(joined) => {
            cmd.env(var, joined);
        }
        Err(e) => warn!(var, error = %e, "ignoring unusable library search path"),
    }
}

fn spawn_reader<R>(
    mut stream: R,
    kind: StreamKind,
    tracker: Arc<Mutex<ProgressTracker>>,
    sink: EventSink,
    tail: Option<Arc<Mutex<TailBuffer>>>,
    mut scan: Option<SignatureScan>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(stream = ?kind, error = %e, "output read failed");
                    break;
                }
            };
            let chunk = &buf[..n];

            if let Some(tail) = &tail {
                if let Ok(mut tail) = tail.lock() {
                    tail.push(&String::from_utf8_lossy(chunk));
                }
            }
            if let Some(scan) = scan.as_mut() {
                scan.feed(chunk);
            }

            // Publish under the tracker lock so events from the two pipes
            // and the estimator stay in percent order.
            if let Ok(mut tracker) = tracker.lock() {
                let events = tracker.feed(kind, chunk);
                sink.publish_all(events);
            }
        }

        if let Some(scan) = scan.as_mut() {
            scan.finish();
        }
        if let Ok(mut tracker) = tracker.lock() {
            let events = tracker.finish_stream(kind);
            sink.publish_all(events);
        }
    })
}

/// State owned by the per-invocation monitor task.
struct Monitor {
    id: InvocationId,
    registry: Registry,
    config: Arc<SupervisorConfig>,
    tracker: Arc<Mutex<ProgressTracker>>,
    sink: EventSink,
    tail: Arc<Mutex<TailBuffer>>,
    signature_hit: Arc<Mutex<Option<String>>>,
    readers: Vec<JoinHandle<()>>,
    estimator: Option<JoinHandle<()>>,
    artifact: Option<PathBuf>,
    started: Instant,
}

impl Monitor {
    async fn run(
        mut self,
        mut child: Child,
        mut abort_rx: oneshot::Receiver<()>,
        result_tx: oneshot::Sender<ExecutionResult>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            signal = &mut abort_rx => match signal {
                Ok(()) => {
                    info!(invocation = %self.id, "terminating process");
                    terminate::terminate_with_grace(&mut child, self.config.abort_grace).await
                }
                // Sender dropped without an abort; keep waiting.
                Err(_) => child.wait().await,
            },
        };

        if let Some(estimator) = self.estimator.take() {
            estimator.abort();
        }
        self.drain_readers().await;

        let mut result = self.resolve(status).await;
        if !result.success() {
            result.matched_signature = self
                .signature_hit
                .lock()
                .ok()
                .and_then(|mut hit| hit.take());
        }

        // Evict before publishing so the id is no longer valid once the
        // result is observable.
        self.registry.remove(&self.id);

        if let Ok(mut tracker) = self.tracker.lock() {
            if result.success() {
                if let Some(event) = tracker.complete() {
                    self.sink.publish(event);
                }
            } else {
                tracker.close();
            }
        }

        info!(
            invocation = %self.id,
            outcome = ?result.outcome,
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "tool process finished"
        );

        self.sink.publish(InvocationEvent::Completed(result.clone()));
        let _ = result_tx.send(result);
    }

    /// Wait for both pipes to hit EOF, bounded so a grandchild holding a
    /// pipe open cannot stall the result.
    async fn drain_readers(&mut self) {
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        for reader in self.readers.iter_mut() {
            if tokio::time::timeout_at(deadline, &mut *reader).await.is_err() {
                debug!(invocation = %self.id, "output reader still open after exit; detaching");
                reader.abort();
            }
        }
    }

    async fn resolve(&self, status: std::io::Result<ExitStatus>) -> ExecutionResult {
        let duration = self.started.elapsed();
        let id = self.id.clone();

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                if self.registry.was_aborted(&id) {
                    return ExecutionResult::aborted(id, None, duration);
                }
                return ExecutionResult::failed(id, None, duration, format!("waiting for process failed: {e}"));
            }
        };
        let code = status.code();

        if self.registry.was_aborted(&id) {
            return ExecutionResult::aborted(id, code, duration);
        }

        if status.success() {
            if let Some(artifact) = &self.artifact {
                let exists = tokio::fs::try_exists(artifact).await.unwrap_or(false);
                if !exists {
                    return ExecutionResult::failed(
                        id,
                        code,
                        duration,
                        format!(
                            "process exited successfully but did not produce {}",
                            artifact.display()
                        ),
                    );
                }
            }
            return ExecutionResult::succeeded(id, code, duration);
        }

        let tail = self
            .tail
            .lock()
            .map(|t| t.as_str().trim().to_string())
            .unwrap_or_default();
        let head = match code {
            Some(code) => format!("process exited with code {code}"),
            None => "process was terminated by a signal".to_string(),
        };
        let message = if tail.is_empty() {
            head
        } else {
            format!("{head}: {tail}")
        };
        ExecutionResult::failed(id, code, duration, message)
    }
}
