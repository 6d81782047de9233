// tests/supervisor_lifecycle.rs
//
// End-to-end behaviour of `ProcessSupervisor` against real `sh` processes.
#![cfg(unix)]

use std::error::Error;
use std::time::{Duration, Instant};

use mediabridge::exec::{InvocationEvent, Outcome, ProcessSupervisor, SpawnError, SpawnRequest};
use mediabridge::progress::EstimatorSpec;
use mediabridge::types::{GrammarKind, InvocationId};
use mediabridge_test_utils::builders::{fast_supervisor_config, sh};
use mediabridge_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn supervisor() -> ProcessSupervisor {
    ProcessSupervisor::new(fast_supervisor_config())
}

fn percents(events: &[InvocationEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            InvocationEvent::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect()
}

const HELPER_SCRIPT: &str = r#"
echo '{"type":"progress","phase":"load","progress":10,"message":"Loading model"}'
echo '{"type":"progress","phase":"run","progress":40}'
echo '{"type":"progress","phase":"run","progress":30}'
echo '{"type":"progress","phase":"run","progress":99}'
"#;

#[tokio::test]
async fn success_reports_monotonic_progress_and_completes_last() -> TestResult {
    init_tracing();
    let sup = supervisor();

    let invocation = sup.spawn(
        sh(HELPER_SCRIPT)
            .with_id("helper")
            .with_grammar(GrammarKind::JsonLines),
    )?;
    let (events, result) = with_timeout(invocation.collect()).await;

    assert!(result.success(), "unexpected failure: {result:?}");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(percents(&events), vec![10.0, 40.0, 95.0, 100.0]);
    assert!(matches!(events.last(), Some(InvocationEvent::Completed(r)) if r.success()));
    assert!(events.iter().any(
        |e| matches!(e, InvocationEvent::Phase { label, .. } if label == "Loading model")
    ));
    assert!(!sup.is_active(&InvocationId::from("helper")));
    Ok(())
}

#[tokio::test]
async fn failure_carries_exit_code_and_stderr_tail() -> TestResult {
    init_tracing();
    let sup = supervisor();

    let invocation = sup.spawn(sh("echo 'decoder exploded' >&2; exit 3"))?;
    let (events, result) = with_timeout(invocation.collect()).await;

    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.exit_code, Some(3));
    let error = result.error.unwrap_or_default();
    assert!(error.contains("code 3"), "{error}");
    assert!(error.contains("decoder exploded"), "{error}");
    assert!(!percents(&events).contains(&100.0));
    Ok(())
}

#[tokio::test]
async fn missing_artifact_turns_zero_exit_into_failure() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("never-written.mp3");
    let sup = supervisor();

    let result = with_timeout(sup.spawn(sh("exit 0").with_artifact(&missing))?.wait()).await;

    assert!(!result.success());
    assert_eq!(result.exit_code, Some(0));
    assert!(result.error.unwrap_or_default().contains("never-written.mp3"));
    Ok(())
}

#[tokio::test]
async fn present_artifact_counts_as_success() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.wav");
    let script = format!("printf data > '{}'", out.display());
    let sup = supervisor();

    let result = with_timeout(sup.spawn(sh(&script).with_artifact(&out))?.wait()).await;

    assert!(result.success(), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn abort_is_idempotent_and_reports_aborted() -> TestResult {
    init_tracing();
    let sup = supervisor();
    let id = InvocationId::from("long");

    let invocation = sup.spawn(sh("sleep 30").with_id(id.clone()))?;
    assert!(sup.is_active(&id));

    assert!(sup.abort(&id));
    assert!(sup.abort(&id));

    let result = with_timeout(invocation.wait()).await;
    assert_eq!(result.outcome, Outcome::Aborted);
    assert_eq!(result.error.as_deref(), Some("aborted"));
    assert!(!sup.is_active(&id));
    assert!(!sup.abort(&id));
    Ok(())
}

#[tokio::test]
async fn abort_of_unknown_id_has_no_effect() -> TestResult {
    init_tracing();
    let sup = supervisor();
    let invocation = sup.spawn(sh("sleep 0.2").with_id("real"))?;

    assert!(!sup.abort(&InvocationId::from("ghost")));
    assert_eq!(sup.registry().len(), 1);

    let result = with_timeout(invocation.wait()).await;
    assert!(result.success());
    Ok(())
}

#[tokio::test]
async fn abort_escalates_when_terminate_is_ignored() -> TestResult {
    init_tracing();
    let sup = supervisor();
    let id = InvocationId::from("stubborn");

    // Ignores SIGTERM; only the forced kill after the grace period stops it.
    let invocation = sup.spawn(sh("trap '' TERM; sleep 30 & wait").with_id(id.clone()))?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    assert!(sup.abort(&id));
    let result = with_timeout(invocation.wait()).await;

    assert!(result.is_aborted());
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn aborting_one_invocation_leaves_another_untouched() -> TestResult {
    init_tracing();
    let sup = supervisor();
    let first = InvocationId::from("first");
    let second = InvocationId::from("second");

    let a = sup.spawn(sh("sleep 30").with_id(first.clone()))?;
    let b = sup.spawn(
        sh(r#"sleep 0.3; echo '{"type":"progress","progress":50}'; sleep 0.1"#)
            .with_id(second.clone())
            .with_grammar(GrammarKind::JsonLines),
    )?;

    assert!(sup.abort(&first));
    let a_result = with_timeout(a.wait()).await;
    assert!(a_result.is_aborted());
    assert!(sup.is_active(&second));

    let (events, b_result) = with_timeout(b.collect()).await;
    assert!(b_result.success());
    assert_eq!(b_result.id, second);
    assert_eq!(percents(&events), vec![50.0, 100.0]);
    assert!(events.iter().all(|e| e.id() == &second));
    Ok(())
}

#[tokio::test]
async fn colliding_active_id_is_rejected() -> TestResult {
    init_tracing();
    let sup = supervisor();

    let running = sup.spawn(sh("sleep 30").with_id("dup"))?;
    let err = sup.spawn(sh("true").with_id("dup")).unwrap_err();
    assert!(matches!(err, SpawnError::InvocationInUse { .. }));

    sup.abort(running.id());
    with_timeout(running.wait()).await;

    // Reusable once the previous holder completed.
    let again = sup.spawn(sh("true").with_id("dup"))?;
    assert!(with_timeout(again.wait()).await.success());
    Ok(())
}

#[tokio::test]
async fn missing_binary_is_classified() {
    init_tracing();
    let sup = supervisor();

    let err = sup
        .spawn(SpawnRequest::new("/definitely/not/here/ffmpeg", ["-version"]))
        .unwrap_err();

    assert!(matches!(err, SpawnError::BinaryMissing { .. }));
    assert!(sup.registry().is_empty());
}

#[tokio::test]
async fn estimator_fills_silence_and_stops_at_exit() -> TestResult {
    init_tracing();
    let sup = supervisor();

    let spec = EstimatorSpec::new(2.0, 1.0, 35.0, 95.0).with_interval(Duration::from_millis(50));
    let invocation = sup.spawn(sh("sleep 0.6").with_estimator(spec))?;
    let (events, result) = with_timeout(invocation.collect()).await;

    assert!(result.success());
    let seen = percents(&events);
    assert!(seen.len() >= 3, "{seen:?}");
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
    assert!(seen[0] >= 35.0);
    // Real exit arrives well before the projection reaches the ceiling.
    assert!(seen[seen.len() - 2] < 95.0, "{seen:?}");
    assert_eq!(seen.last(), Some(&100.0));
    Ok(())
}

#[tokio::test]
async fn estimator_window_opens_when_the_quiet_phase_starts() -> TestResult {
    init_tracing();
    let sup = supervisor();
    let script = r#"
echo '{"type":"progress","progress":20,"message":"Loading model"}'
sleep 0.4
echo '{"type":"progress","progress":35,"message":"Transcribing"}'
sleep 0.6
"#;

    // Anchored at spawn, this would already be past 40 before the
    // transcribing phase is announced.
    let spec = EstimatorSpec::new(1.0, 1.0, 35.0, 95.0)
        .with_interval(Duration::from_millis(50))
        .start_on_phase("Transcribing");
    let invocation = sup.spawn(
        sh(script)
            .with_grammar(GrammarKind::JsonLines)
            .with_estimator(spec),
    )?;
    let (events, result) = with_timeout(invocation.collect()).await;

    assert!(result.success());
    let split = events
        .iter()
        .position(|e| matches!(e, InvocationEvent::Phase { label, .. } if label == "Transcribing"))
        .ok_or("transcribing phase missing")?;
    assert_eq!(percents(&events[..split]), vec![20.0]);

    let after = percents(&events[split..]);
    assert_eq!(after.first(), Some(&35.0));
    assert!(after.iter().any(|p| *p > 35.0 && *p < 100.0), "{after:?}");
    assert!(after.windows(2).all(|w| w[0] < w[1]), "{after:?}");
    assert_eq!(after.last(), Some(&100.0));
    Ok(())
}

#[tokio::test]
async fn broadcast_subscribers_see_every_invocation() -> TestResult {
    init_tracing();
    let sup = supervisor();
    let mut rx = sup.subscribe();

    let a = sup.spawn(sh("true").with_id("a"))?;
    let b = sup.spawn(sh("true").with_id("b"))?;
    with_timeout(a.wait()).await;
    with_timeout(b.wait()).await;

    let mut completed = Vec::new();
    while completed.len() < 2 {
        if let InvocationEvent::Completed(r) = with_timeout(rx.recv()).await? {
            completed.push(r.id.to_string());
        }
    }
    completed.sort();
    assert_eq!(completed, ["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn transcoder_output_on_stderr_drives_progress() -> TestResult {
    init_tracing();
    let sup = supervisor();
    let script = r#"
printf '  Duration: 00:00:10.00, start: 0.000000, bitrate: 128 kb/s\n' >&2
printf 'size=     256kB time=00:00:02.50 bitrate= 838.9kbits/s speed=2.5x\r' >&2
printf 'size=     512kB time=00:00:05.00 bitrate= 838.9kbits/s speed=2.5x\r' >&2
"#;

    let invocation = sup.spawn(sh(script).with_grammar(GrammarKind::Transcoder))?;
    let (events, result) = with_timeout(invocation.collect()).await;

    assert!(result.success());
    assert_eq!(percents(&events), vec![25.0, 50.0, 100.0]);
    Ok(())
}
