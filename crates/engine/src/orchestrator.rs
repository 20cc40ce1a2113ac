//! Concurrent detector fan-out with per-detector deadlines.
//!
//! Every registered detector runs in its own tokio task against the same
//! shared, read-only candidate and snapshot. The orchestrator waits for all
//! of them, and whatever a detector does (error, panic, hang, garbage
//! numbers) it contributes exactly one entry to the result map.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::error::Elapsed;
use tracing::{debug, info, warn};

use concord_core::{Candidate, DataSnapshot, DetectorResult, DetectorResults};

use crate::detector::DetectorRegistry;
use crate::error::DetectorError;

/// Extra time granted past the per-detector timeout before a task that
/// ignores cancellation is abandoned.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(250);

type TaskOutput = Result<Result<DetectorResult, DetectorError>, Elapsed>;

/// How a single detector task settled.
enum Outcome {
    Finished(DetectorResult),
    Errored(DetectorError),
    TimedOut,
    Panicked(String),
}

/// Aborts every tracked task when dropped, so a cancelled evaluation never
/// leaves detector work running behind it.
#[derive(Default)]
struct TaskGuard {
    handles: Vec<AbortHandle>,
}

impl TaskGuard {
    fn track(&mut self, handle: AbortHandle) {
        self.handles.push(handle);
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Orchestrator {
    timeout: Duration,
    grace: Duration,
}

impl Orchestrator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every registered detector and collect one result per identity.
    pub async fn run(
        &self,
        registry: &DetectorRegistry,
        candidate: Arc<Candidate>,
        snapshot: Arc<DataSnapshot>,
    ) -> DetectorResults {
        if registry.is_empty() {
            return DetectorResults::new();
        }

        info!(
            candidate = %candidate.id,
            detectors = registry.len(),
            timeout_ms = self.timeout.as_millis() as u64,
            "dispatching detectors"
        );

        let started = Instant::now();
        let mut guard = TaskGuard::default();
        let mut pending = Vec::with_capacity(registry.len());
        for (id, detector) in registry.iter() {
            let detector = Arc::clone(detector);
            let candidate = Arc::clone(&candidate);
            let snapshot = Arc::clone(&snapshot);
            let timeout = self.timeout;
            let handle = tokio::spawn(async move {
                tokio::time::timeout(timeout, detector.evaluate(&candidate, &snapshot)).await
            });
            guard.track(handle.abort_handle());
            pending.push((id.clone(), handle));
        }

        let deadline = self.timeout + self.grace;
        let settled = join_all(pending.into_iter().map(|(id, handle)| async move {
            let outcome = settle(handle, deadline).await;
            (id, outcome, elapsed_ms(started))
        }))
        .await;
        drop(guard);

        let mut results = DetectorResults::new();
        let mut failed = 0usize;
        for (id, outcome, elapsed) in settled {
            let result = match outcome {
                Outcome::Finished(result) => sanitize(&id, result, elapsed),
                Outcome::Errored(e) => {
                    warn!(detector = %id, error = %e, elapsed_ms = elapsed, "detector failed");
                    DetectorResult::failed(&id, elapsed, &e.to_string())
                }
                Outcome::TimedOut => {
                    warn!(
                        detector = %id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "detector timed out"
                    );
                    let reason = format!("timed out after {} ms", self.timeout.as_millis());
                    DetectorResult::failed(&id, elapsed, &reason)
                }
                Outcome::Panicked(message) => {
                    warn!(detector = %id, panic = %message, "detector panicked");
                    DetectorResult::failed(&id, elapsed, &format!("panicked: {message}"))
                }
            };
            if result.is_failed() {
                failed += 1;
            }
            results.insert(id, result);
        }

        info!(
            candidate = %candidate.id,
            detectors = results.len(),
            failed,
            elapsed_ms = elapsed_ms(started),
            "detector fan-out complete"
        );
        results
    }
}

async fn settle(mut handle: JoinHandle<TaskOutput>, deadline: Duration) -> Outcome {
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(Ok(Ok(result)))) => Outcome::Finished(result),
        Ok(Ok(Ok(Err(e)))) => Outcome::Errored(e),
        Ok(Ok(Err(_))) => Outcome::TimedOut,
        Ok(Err(e)) => Outcome::Panicked(join_error_message(e)),
        Err(_) => {
            handle.abort();
            Outcome::TimedOut
        }
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic())
    } else {
        e.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Pin the result to the registered identity and measured time, and replace
/// out-of-range numbers with a failed result.
fn sanitize(id: &str, mut result: DetectorResult, elapsed: u64) -> DetectorResult {
    if result.detector_id != id {
        warn!(
            detector = %id,
            reported = %result.detector_id,
            "detector reported a different identity; rewriting"
        );
        result.detector_id = id.to_string();
    }
    if !result.is_well_formed() {
        warn!(
            detector = %id,
            confidence = result.confidence,
            uncertainty = result.uncertainty,
            "detector returned malformed output"
        );
        let reason = format!(
            "malformed output: confidence={}, uncertainty={}",
            result.confidence, result.uncertainty
        );
        return DetectorResult::failed(id, elapsed, &reason);
    }
    debug!(
        detector = %id,
        detected = result.detected,
        confidence = result.confidence,
        elapsed_ms = elapsed,
        "detector finished"
    );
    result.with_elapsed_ms(elapsed)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    enum Behaviour {
        Report(DetectorResult),
        Sleep(Duration),
        Block(Duration),
        Fail,
        Panic,
    }

    struct Scripted {
        id: &'static str,
        behaviour: Behaviour,
        finished: Arc<AtomicBool>,
    }

    impl Scripted {
        fn new(id: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                id,
                behaviour,
                finished: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    #[async_trait]
    impl Detector for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn evaluate(
            &self,
            _candidate: &Candidate,
            _snapshot: &DataSnapshot,
        ) -> Result<DetectorResult, DetectorError> {
            let result = match &self.behaviour {
                Behaviour::Report(r) => Ok(r.clone()),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(DetectorResult::new(self.id, true, 0.9, 0.0, "slow"))
                }
                Behaviour::Block(d) => {
                    std::thread::sleep(*d);
                    Ok(DetectorResult::new(self.id, true, 0.9, 0.0, "blocking"))
                }
                Behaviour::Fail => Err(DetectorError::DataUnavailable("no scenes".into())),
                Behaviour::Panic => panic!("index out of bounds"),
            };
            self.finished.store(true, Ordering::SeqCst);
            result
        }
    }

    fn registry(detectors: Vec<Arc<Scripted>>) -> DetectorRegistry {
        let mut registry = DetectorRegistry::new();
        for d in detectors {
            registry.register(d).unwrap();
        }
        registry
    }

    async fn run(orchestrator: Orchestrator, registry: &DetectorRegistry) -> DetectorResults {
        orchestrator
            .run(
                registry,
                Arc::new(Candidate::new(1.0, 2.0, "copper", "porphyry")),
                Arc::new(DataSnapshot::empty()),
            )
            .await
    }

    #[tokio::test]
    async fn every_detector_gets_an_entry() {
        let registry = registry(vec![
            Scripted::new(
                "spectral",
                Behaviour::Report(DetectorResult::new("spectral", true, 0.8, 0.1, "ratio")),
            ),
            Scripted::new("gravity", Behaviour::Fail),
            Scripted::new("structural", Behaviour::Panic),
        ]);
        let results = run(Orchestrator::new(Duration::from_secs(2)), &registry).await;

        assert_eq!(results.len(), 3);
        assert!(results["spectral"].detected);
        assert!(!results["spectral"].is_failed());

        let gravity = &results["gravity"];
        assert!(gravity.is_failed());
        assert_eq!(gravity.confidence, 0.0);
        assert_eq!(gravity.uncertainty, 1.0);

        let structural = &results["structural"];
        assert!(structural.is_failed());
        assert!(structural.payload["error"]
            .as_str()
            .unwrap()
            .contains("index out of bounds"));
    }

    #[tokio::test]
    async fn timeouts_are_independent_per_detector() {
        let slow = Scripted::new("slow", Behaviour::Sleep(Duration::from_secs(10)));
        let slow_flag = Arc::clone(&slow.finished);
        let registry = registry(vec![
            slow,
            Scripted::new(
                "fast",
                Behaviour::Report(DetectorResult::new("fast", true, 0.7, 0.2, "m")),
            ),
        ]);

        let started = Instant::now();
        let results = run(Orchestrator::new(Duration::from_millis(50)), &registry).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        assert!(results["slow"].is_failed());
        assert!(results["slow"].payload["error"]
            .as_str()
            .unwrap()
            .contains("timed out"));
        assert!(!results["fast"].is_failed());
        assert!(!slow_flag.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn uncooperative_detector_is_abandoned() {
        let registry = registry(vec![Scripted::new(
            "stuck",
            Behaviour::Block(Duration::from_millis(600)),
        )]);
        let orchestrator = Orchestrator::new(Duration::from_millis(20))
            .with_grace(Duration::from_millis(20));

        let started = Instant::now();
        let results = run(orchestrator, &registry).await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(results["stuck"].is_failed());
    }

    #[tokio::test]
    async fn malformed_output_is_replaced() {
        let registry = registry(vec![
            Scripted::new(
                "nan",
                Behaviour::Report(DetectorResult::new("nan", true, f64::NAN, 0.1, "m")),
            ),
            Scripted::new(
                "big",
                Behaviour::Report(DetectorResult::new("big", true, 0.9, 1.5, "m")),
            ),
        ]);
        let results = run(Orchestrator::new(Duration::from_secs(1)), &registry).await;
        assert!(results["nan"].is_failed());
        assert!(!results["nan"].detected);
        assert!(results["big"].is_failed());
    }

    #[tokio::test]
    async fn identity_is_pinned_to_registration() {
        let registry = registry(vec![Scripted::new(
            "gravity",
            Behaviour::Report(DetectorResult::new("bouguer", true, 0.6, 0.1, "anomaly")),
        )]);
        let results = run(Orchestrator::new(Duration::from_secs(1)), &registry).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results["gravity"].detector_id, "gravity");
    }

    #[tokio::test]
    async fn empty_registry_yields_empty_map() {
        let orchestrator = Orchestrator::new(Duration::from_secs(1));
        let results = run(orchestrator, &DetectorRegistry::new()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn dropped_run_aborts_detectors() {
        let slow = Scripted::new("slow", Behaviour::Sleep(Duration::from_millis(200)));
        let flag = Arc::clone(&slow.finished);
        let registry = registry(vec![slow]);
        let orchestrator = Orchestrator::new(Duration::from_secs(5));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            run(orchestrator, &registry),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!flag.load(Ordering::SeqCst));
    }
}
