// src/server/manager.rs

//! Lifecycle of the single long-lived server process.
//!
//! State transitions happen under one mutex and never across an `.await`.
//! Each start bumps a generation counter; background tasks (the process
//! monitor and the idle timer) only touch the state while their generation
//! is still current, so a stale task can never clobber a newer server.
//!
//! Callers that arrive while a start is in flight share its outcome through
//! a `watch` channel instead of spawning a second process.
//!
//! Stopping only requests termination, so `Stopped` can be entered while the
//! old process is still exiting. A new start waits for the previous process
//! to be reaped first; at most one server process exists at any time.

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::errors::{BridgeError, Result};
use crate::exec::spawn_error::SpawnError;
use crate::exec::terminate;

use super::status::{ServerPhase, ServerStatus};
use super::transport::{ServerClient, ServerRequest, ServerResponse};

/// Grace period between the cooperative terminate and the forced kill.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Extra time allowed past `STOP_GRACE` for the forced kill to be reaped.
const REAP_SLACK: Duration = Duration::from_secs(2);

/// How often `call` re-runs `ensure_ready` if the server was stopped
/// between readiness and claiming it.
const CLAIM_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
enum StartFailure {
    TimedOut(Duration),
    Exited(Option<i32>),
    Cancelled,
}

impl From<StartFailure> for BridgeError {
    fn from(failure: StartFailure) -> Self {
        match failure {
            StartFailure::TimedOut(timeout) => BridgeError::ServerStartupTimeout { timeout },
            StartFailure::Exited(code) => BridgeError::ServerExited { code },
            StartFailure::Cancelled => BridgeError::StartCancelled,
        }
    }
}

/// `None` while the start is still pending.
type StartOutcome = Option<std::result::Result<(), StartFailure>>;

#[derive(Debug)]
struct State {
    phase: ServerPhase,
    generation: u64,
    pid: Option<u32>,
    ready_at: Option<Instant>,
    pending: Option<watch::Receiver<StartOutcome>>,
    kill_tx: Option<oneshot::Sender<()>>,
    idle_timer: Option<JoinHandle<()>>,
    in_flight: usize,
    /// Flips to `true` once the most recently spawned process has been
    /// reaped. Survives `reset`.
    last_exit: Option<watch::Receiver<bool>>,
}

impl State {
    fn new() -> Self {
        Self {
            phase: ServerPhase::Stopped,
            generation: 0,
            pid: None,
            ready_at: None,
            pending: None,
            kill_tx: None,
            idle_timer: None,
            in_flight: 0,
            last_exit: None,
        }
    }

    /// Exit handle of a previous process that is still shutting down.
    fn exiting(&self) -> Option<watch::Receiver<bool>> {
        self.last_exit.as_ref().filter(|rx| !*rx.borrow()).cloned()
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug)]
struct Shared {
    config: ServerConfig,
    state: Mutex<State>,
    spawn_count: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the server and move to `Starting`. Runs under the state lock,
    /// which is what makes concurrent starts impossible.
    fn begin_start(self: &Arc<Self>, st: &mut State) -> Result<watch::Receiver<StartOutcome>> {
        let cfg = &self.config;
        let args = cfg.resolved_args();

        let mut cmd = Command::new(&cfg.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        terminate::isolate(&mut cmd);

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::classify(&cfg.binary, e))?;
        self.spawn_count.fetch_add(1, Ordering::SeqCst);

        st.generation += 1;
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(false);
        st.phase = ServerPhase::Starting;
        st.pid = child.id();
        st.ready_at = None;
        st.pending = Some(outcome_rx.clone());
        st.kill_tx = Some(kill_tx);
        st.last_exit = Some(exit_rx);

        info!(
            pid = ?st.pid,
            port = cfg.port,
            generation = st.generation,
            binary = %cfg.binary,
            ?args,
            "starting server"
        );

        let task = ServerTask {
            shared: Arc::downgrade(self),
            generation: st.generation,
            startup_timeout: cfg.startup_timeout,
            marker: cfg.readiness_marker.clone(),
        };
        tokio::spawn(task.run(child, kill_rx, outcome_tx, ReapSignal(exit_tx)));

        Ok(outcome_rx)
    }

    /// Request termination of the current process, if any, and reset to
    /// `Stopped`. Does not wait for the process to exit.
    fn stop_locked(&self, st: &mut State, reason: &str) {
        if st.phase != ServerPhase::Stopped {
            info!(pid = ?st.pid, reason, "stopping server");
        }
        if let Some(pid) = st.pid {
            if let Err(e) = terminate::request_terminate(pid) {
                debug!(pid, error = %e, "terminate request failed");
            }
        }
        if let Some(kill_tx) = st.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        self.reset(st);
    }

    fn reset(&self, st: &mut State) {
        st.cancel_idle_timer();
        st.phase = ServerPhase::Stopped;
        st.generation += 1;
        st.pid = None;
        st.ready_at = None;
        st.pending = None;
        st.kill_tx = None;
        st.in_flight = 0;
    }

    fn arm_idle_timer(self: &Arc<Self>, st: &mut State) {
        st.cancel_idle_timer();
        let generation = st.generation;
        let idle = self.config.idle_timeout;
        let weak = Arc::downgrade(self);

        st.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut st = shared.lock();
            if st.generation != generation
                || st.in_flight > 0
                || st.phase != ServerPhase::Ready
            {
                return;
            }
            // Detach rather than abort: this is the timer's own task.
            st.idle_timer = None;
            info!(?idle, "server idle; shutting down to release memory");
            shared.stop_locked(&mut st, "idle timeout");
        }));
    }

    fn finish_call(self: &Arc<Self>, generation: u64, crashed: bool) {
        let mut st = self.lock();
        if st.generation != generation {
            return;
        }
        if crashed {
            self.stop_locked(&mut st, "server unreachable");
            return;
        }
        st.in_flight = st.in_flight.saturating_sub(1);
        if st.in_flight == 0 {
            st.phase = ServerPhase::Ready;
            self.arm_idle_timer(&mut st);
        }
    }
}

/// Marks one request as in flight for as long as it lives, so a dropped
/// `call` future still releases its claim.
struct InFlight<'a> {
    shared: &'a Arc<Shared>,
    generation: u64,
    crashed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.finish_call(self.generation, self.crashed);
    }
}

/// Starts, proxies to and stops one persistent server process.
///
/// Cheap to clone; clones manage the same server. The process is killed
/// once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct ServerManager {
    shared: Arc<Shared>,
    client: ServerClient,
}

impl ServerManager {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let client = ServerClient::new(config.base_url(), config.request_timeout)?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::new()),
                spawn_count: AtomicUsize::new(0),
            }),
            client,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> ServerPhase {
        self.shared.lock().phase
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.lock().pid
    }

    /// Number of server processes spawned over this manager's lifetime.
    pub fn spawn_count(&self) -> usize {
        self.shared.spawn_count.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ServerStatus {
        let st = self.shared.lock();
        ServerStatus {
            phase: st.phase,
            running: st.phase.is_running(),
            ready: st.phase.is_ready(),
            port: self.shared.config.port,
            uptime: st.ready_at.map(|t| t.elapsed()),
        }
    }

    /// Resolve once the server is ready, starting it if necessary.
    ///
    /// Concurrent callers during a start share that start's outcome. From
    /// `Stopped`, a previous process that is still exiting is waited for
    /// before a new one is spawned.
    pub async fn ensure_ready(&self) -> Result<()> {
        let mut outcome = loop {
            let exiting = {
                let mut st = self.shared.lock();
                match st.phase {
                    ServerPhase::Ready | ServerPhase::Generating => return Ok(()),
                    ServerPhase::Starting => match &st.pending {
                        Some(rx) => break rx.clone(),
                        None => return Err(BridgeError::StartCancelled),
                    },
                    ServerPhase::Stopped => match st.exiting() {
                        Some(exit) => exit,
                        None => break self.shared.begin_start(&mut st)?,
                    },
                }
            };
            wait_for_exit(exiting).await?;
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or(Err(StartFailure::Cancelled)),
            Err(_) => Err(StartFailure::Cancelled),
        };
        result.map_err(BridgeError::from)
    }

    /// Send one request, starting the server first if needed.
    ///
    /// A connection failure means the process is gone or wedged; the
    /// server is stopped so the next call starts a fresh one.
    pub async fn call(&self, request: ServerRequest) -> Result<ServerResponse> {
        let mut claim = self.claim().await?;
        let result = self.client.send(&request).await;
        if let Err(BridgeError::ServerCrash(reason)) = &result {
            warn!(%reason, "server unreachable; marking it stopped");
            claim.crashed = true;
        }
        drop(claim);
        result
    }

    async fn claim(&self) -> Result<InFlight<'_>> {
        for _ in 0..CLAIM_ATTEMPTS {
            self.ensure_ready().await?;
            let mut st = self.shared.lock();
            if st.phase.is_ready() {
                st.cancel_idle_timer();
                st.in_flight += 1;
                st.phase = ServerPhase::Generating;
                return Ok(InFlight {
                    shared: &self.shared,
                    generation: st.generation,
                    crashed: false,
                });
            }
            debug!(phase = %st.phase, "server stopped before the request was issued; retrying");
        }
        Err(BridgeError::StartCancelled)
    }

    /// Request termination and reset to `Stopped`. Safe in any phase; a
    /// pending start resolves with `StartCancelled`.
    pub fn stop(&self) {
        let mut st = self.shared.lock();
        self.shared.stop_locked(&mut st, "stop requested");
    }
}

/// Wait, bounded, for a previous server process to be reaped.
async fn wait_for_exit(mut exit: watch::Receiver<bool>) -> Result<()> {
    debug!("waiting for the previous server process to exit");
    let bound = STOP_GRACE + REAP_SLACK;
    match tokio::time::timeout(bound, exit.wait_for(|reaped| *reaped)).await {
        // A closed channel means the owning task is gone, and the child
        // with it.
        Ok(_) => Ok(()),
        Err(_) => {
            warn!(?bound, "previous server process was not reaped in time");
            Err(BridgeError::ServerStillExiting { waited: bound })
        }
    }
}

/// Publishes `true` on the exit handle when dropped, however the owning
/// task ends.
struct ReapSignal(watch::Sender<bool>);

impl Drop for ReapSignal {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Owns the child process for one generation.
struct ServerTask {
    shared: Weak<Shared>,
    generation: u64,
    startup_timeout: Duration,
    marker: String,
}

enum Startup {
    Ready,
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

impl ServerTask {
    async fn run(
        self,
        mut child: Child,
        mut kill_rx: oneshot::Receiver<()>,
        outcome_tx: watch::Sender<StartOutcome>,
        _reaped: ReapSignal,
    ) {
        let (marker_tx, mut marker_rx) = mpsc::channel::<()>(1);
        if let Some(out) = child.stdout.take() {
            spawn_output_reader(out, "stdout", self.marker.clone(), marker_tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            spawn_output_reader(err, "stderr", self.marker.clone(), marker_tx.clone());
        }
        drop(marker_tx);

        let startup = tokio::select! {
            biased;
            Some(()) = marker_rx.recv() => Startup::Ready,
            status = child.wait() => Startup::Exited(status.ok().and_then(|s| s.code())),
            _ = tokio::time::sleep(self.startup_timeout) => Startup::TimedOut,
            _ = &mut kill_rx => Startup::Cancelled,
        };

        // (failure, child still running)
        let failure = match startup {
            Startup::Ready => {
                if self.mark_ready() {
                    let _ = outcome_tx.send(Some(Ok(())));
                    None
                } else {
                    // Stopped between the marker and taking the lock.
                    Some((StartFailure::Cancelled, true))
                }
            }
            Startup::Exited(code) => {
                warn!(code, "server exited before becoming ready");
                self.reset_if_current();
                Some((StartFailure::Exited(code), false))
            }
            Startup::TimedOut => {
                warn!(timeout = ?self.startup_timeout, "server did not become ready in time");
                self.reset_if_current();
                Some((StartFailure::TimedOut(self.startup_timeout), true))
            }
            Startup::Cancelled => {
                debug!("server start cancelled");
                Some((StartFailure::Cancelled, true))
            }
        };
        if let Some((failure, running)) = failure {
            // Waiters hear the outcome right away; a new start still waits
            // on the exit handle until the child is reaped below.
            let _ = outcome_tx.send(Some(Err(failure)));
            if running {
                stop_child(&mut child).await;
            }
            return;
        }

        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                warn!(code, "server exited unexpectedly");
                self.reset_if_current();
            }
            // Either an explicit stop or the manager being dropped.
            _ = &mut kill_rx => stop_child(&mut child).await,
        }
    }

    fn mark_ready(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut st = shared.lock();
        if st.generation != self.generation {
            return false;
        }
        st.phase = ServerPhase::Ready;
        st.ready_at = Some(Instant::now());
        st.pending = None;
        shared.arm_idle_timer(&mut st);
        info!(pid = ?st.pid, port = shared.config.port, "server ready");
        true
    }

    fn reset_if_current(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut st = shared.lock();
        if st.generation == self.generation {
            shared.reset(&mut st);
        }
    }
}

async fn stop_child(child: &mut Child) {
    match terminate::terminate_with_grace(child, STOP_GRACE).await {
        Ok(status) => info!(code = ?status.code(), "server stopped"),
        Err(e) => warn!(error = %e, "failed to reap server process"),
    }
}

/// Drain one server pipe, signalling once when the readiness marker shows
/// up. Keeps reading afterwards so the server never blocks on a full pipe.
fn spawn_output_reader<R>(
    stream: R,
    stream_name: &'static str,
    marker: String,
    ready_tx: mpsc::Sender<()>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        let mut signalled = false;
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end();
                    trace!(stream = stream_name, "server: {text}");
                    if !signalled && text.contains(marker.as_str()) {
                        signalled = true;
                        let _ = ready_tx.try_send(());
                    }
                }
                Err(e) => {
                    debug!(stream = stream_name, error = %e, "server output read failed");
                    break;
                }
            }
        }
    })
}
