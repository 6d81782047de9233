// tests/fallback_retry.rs

use std::error::Error;

use mediabridge::config::FallbackConfig;
use mediabridge::exec::{FallbackController, Outcome, SpawnRequest};
use mediabridge::types::{AccelerationPreference, ExecutionMode, InvocationId};
use mediabridge_test_utils::fake_runner::{FakeOutcome, FakeRunner};
use mediabridge_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn fallback_config() -> FallbackConfig {
    FallbackConfig {
        accelerated_args: vec!["gpu".to_string()],
        safe_args: vec!["cpu".to_string()],
        ..FallbackConfig::default()
    }
}

#[tokio::test]
async fn accelerator_crash_retries_once_then_stays_safe() -> TestResult {
    init_tracing();
    let runner = FakeRunner::new([
        FakeOutcome::Fail("ggml_vulkan: Device lost".to_string()),
        FakeOutcome::Succeed,
        FakeOutcome::Succeed,
    ]);
    let controller = FallbackController::new(runner.clone(), fallback_config())?;
    let mut notices = controller.subscribe();

    let request = SpawnRequest::new("whisper-cli", ["-f", "a.wav"]).with_id("job-1");
    let result = controller.run(request.clone(), AccelerationPreference::Auto).await?;

    assert!(result.success());
    assert_ne!(result.id, InvocationId::from("job-1"));
    let notice = notices.recv().await?;
    assert_eq!(notice.failed_id, InvocationId::from("job-1"));
    assert_eq!(notice.retry_id, result.id);

    // Next run in the same session goes straight to safe mode.
    assert_eq!(
        controller.effective_mode(AccelerationPreference::Auto),
        ExecutionMode::Safe
    );
    controller.run(request, AccelerationPreference::Auto).await?;

    let modes: Vec<String> = runner
        .requests()
        .iter()
        .map(|r| r.args.last().cloned().unwrap_or_default())
        .collect();
    assert_eq!(modes, ["gpu", "cpu", "cpu"]);
    Ok(())
}

#[tokio::test]
async fn failing_retry_propagates_the_safe_mode_failure() -> TestResult {
    init_tracing();
    let runner = FakeRunner::new([
        FakeOutcome::Fail("CUDA error: out of memory".to_string()),
        FakeOutcome::Fail("input.wav: invalid data".to_string()),
    ]);
    let controller = FallbackController::new(runner.clone(), fallback_config())?;

    let result = controller
        .run(SpawnRequest::new("whisper-cli", ["x"]), AccelerationPreference::Auto)
        .await?;

    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.error.as_deref(), Some("input.wav: invalid data"));
    assert_eq!(runner.requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn abort_during_accelerated_run_is_not_retried() -> TestResult {
    init_tracing();
    let runner = FakeRunner::new([FakeOutcome::Abort]);
    let controller = FallbackController::new(runner.clone(), fallback_config())?;

    let result = controller
        .run(SpawnRequest::new("whisper-cli", ["x"]), AccelerationPreference::Force)
        .await?;

    assert!(result.is_aborted());
    assert!(!controller.is_degraded());
    assert_eq!(runner.requests().len(), 1);
    Ok(())
}

#[cfg(unix)]
mod real_processes {
    use super::*;

    use mediabridge::exec::ProcessSupervisor;
    use mediabridge_test_utils::builders::fast_supervisor_config;
    use mediabridge_test_utils::with_timeout;

    /// Crashes like a GPU build when its first argument is `gpu`.
    const FLAKY_GPU_TOOL: &str = r#"
if [ "$1" = gpu ]; then
  echo "GGML_ASSERT: ggml-cuda.cu:42: !\"CUDA error\"" >&2
  exit 134
fi
echo "transcribed on $1"
"#;

    #[tokio::test]
    async fn supervisor_backed_fallback_recovers() -> TestResult {
        init_tracing();
        let supervisor = ProcessSupervisor::new(fast_supervisor_config());
        let controller = FallbackController::new(supervisor.clone(), fallback_config())?;

        let request = SpawnRequest::new("sh", ["-c", FLAKY_GPU_TOOL, "sh"]);
        let result =
            with_timeout(controller.run(request, AccelerationPreference::Auto)).await?;

        assert!(result.success(), "{result:?}");
        assert!(controller.is_degraded());
        assert!(supervisor.registry().is_empty());
        Ok(())
    }

    /// Asserts first, then buries the assertion under a long backtrace.
    const ASSERT_THEN_BACKTRACE: &str = r##"
if [ "$1" = gpu ]; then
  echo "GGML_ASSERT: ggml-cuda.cu:1234: !\"CUDA error\"" >&2
  i=0
  while [ $i -lt 20 ]; do
    echo "#$i 0x00007f3a2b4c5d6e in ggml_backend_cuda_graph_compute () from /usr/lib/libggml-cuda.so" >&2
    i=$((i+1))
  done
  exit 134
fi
echo "transcribed on $1"
"##;

    #[tokio::test]
    async fn signature_buried_under_long_backtrace_still_falls_back() -> TestResult {
        init_tracing();
        let supervisor = ProcessSupervisor::new(fast_supervisor_config());
        let direct = with_timeout(
            supervisor
                .spawn(SpawnRequest::new("sh", ["-c", ASSERT_THEN_BACKTRACE, "sh", "gpu"]))?
                .wait(),
        )
        .await;
        // The bounded error tail alone no longer shows the assertion.
        assert!(!direct.error.unwrap_or_default().contains("GGML_ASSERT"));

        let controller = FallbackController::new(supervisor, fallback_config())?;
        let mut notices = controller.subscribe();
        let request = SpawnRequest::new("sh", ["-c", ASSERT_THEN_BACKTRACE, "sh"]);
        let result =
            with_timeout(controller.run(request, AccelerationPreference::Auto)).await?;

        assert!(result.success(), "{result:?}");
        assert!(controller.is_degraded());
        let notice = notices.recv().await?;
        assert!(notice.reason.starts_with("GGML_ASSERT"), "{}", notice.reason);
        Ok(())
    }

    #[tokio::test]
    async fn forced_acceleration_after_degradation_is_retried_in_safe_mode() -> TestResult {
        init_tracing();
        let supervisor = ProcessSupervisor::new(fast_supervisor_config());
        let controller = FallbackController::new(supervisor, fallback_config())?;

        let request = SpawnRequest::new("sh", ["-c", FLAKY_GPU_TOOL, "sh"]);
        with_timeout(controller.run(request.clone(), AccelerationPreference::Auto)).await?;
        let forced =
            with_timeout(controller.run(request, AccelerationPreference::Force)).await?;

        // Forced accelerated run fails, is retried once in safe mode and
        // succeeds there.
        assert!(forced.success());
        assert!(controller.is_degraded());
        Ok(())
    }
}
