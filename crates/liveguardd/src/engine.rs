use liveguard_core::{
    FaceDetector, FrameGate, GatePermit, InferencePipeline, LivenessDetector, ModelRegistry,
    PassOutcome, Verdict,
};
use liveguard_hw::{Frame, FrameSource};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Latest outcome visible to observers. Each publication replaces the
/// previous one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Published {
    Verdict(Verdict),
    Failed { sequence: u64, error: String },
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    admitted: AtomicU64,
    dropped: AtomicU64,
    not_ready: AtomicU64,
    verdicts: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub admitted: u64,
    pub dropped: u64,
    pub not_ready: u64,
    pub verdicts: u64,
    pub failures: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            not_ready: self.not_ready.load(Ordering::Relaxed),
            verdicts: self.verdicts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// What happened to a frame handed to [`PipelineHandle::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued for the worker; a publication will follow.
    Admitted,
    /// Gate busy.
    Dropped,
    /// Admitted, but a model is not Ready; gate released, nothing published.
    NotReady,
    /// The worker thread is gone.
    Closed,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Passes slower than this are logged as warnings.
    pub slow_pass: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            slow_pass: Duration::from_secs(1),
        }
    }
}

/// An admitted frame travelling to the worker with its gate permit.
struct Job {
    permit: GatePermit,
    frame: Frame,
}

/// Clone-safe handle to the pipeline thread.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Job>,
    gate: Arc<FrameGate>,
    registry: Arc<ModelRegistry>,
    stats: Arc<PipelineStats>,
    latest: watch::Receiver<Option<Published>>,
}

impl PipelineHandle {
    /// Offer a frame from the delivery context. Never blocks.
    pub fn submit(&self, frame: Frame) -> SubmitOutcome {
        let Some(permit) = self.gate.admit() else {
            PipelineStats::bump(&self.stats.dropped);
            tracing::trace!(seq = frame.sequence(), "gate busy, frame dropped");
            return SubmitOutcome::Dropped;
        };

        if !self.registry.all_ready() {
            permit.release();
            PipelineStats::bump(&self.stats.not_ready);
            tracing::trace!(seq = frame.sequence(), "models not ready, frame skipped");
            return SubmitOutcome::NotReady;
        }

        match self.tx.try_send(Job { permit, frame }) {
            Ok(()) => {
                PipelineStats::bump(&self.stats.admitted);
                SubmitOutcome::Admitted
            }
            // The rejected job carries the permit; dropping it releases the gate.
            Err(mpsc::error::TrySendError::Closed(_)) => SubmitOutcome::Closed,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::error!("pipeline queue full while gate was free");
                SubmitOutcome::Dropped
            }
        }
    }

    /// Watch the latest published outcome.
    pub fn subscribe(&self) -> watch::Receiver<Option<Published>> {
        self.latest.clone()
    }

    pub fn latest(&self) -> Option<Published> {
        self.latest.borrow().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn gate(&self) -> &Arc<FrameGate> {
        &self.gate
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }
}

/// Spawn the pipeline on a dedicated OS thread.
///
/// `load` runs first on that thread and should drive both engines through
/// the registry. Frames submitted before both are Ready come back as
/// [`SubmitOutcome::NotReady`]. Afterwards the thread serves admitted frames
/// one at a time and publishes each outcome after the gate is released.
pub fn spawn_pipeline<D, L, F>(
    mut pipeline: InferencePipeline<D, L>,
    load: F,
    opts: PipelineOptions,
) -> Result<PipelineHandle, EngineError>
where
    D: FaceDetector + 'static,
    L: LivenessDetector + 'static,
    F: FnOnce(&mut InferencePipeline<D, L>) + Send + 'static,
{
    // One slot is enough: the gate admits a single frame at a time.
    let (tx, mut rx) = mpsc::channel::<Job>(1);
    let (publish, latest) = watch::channel(None);
    let stats = Arc::new(PipelineStats::default());

    let handle = PipelineHandle {
        tx,
        gate: Arc::clone(pipeline.gate()),
        registry: Arc::clone(pipeline.registry()),
        stats: Arc::clone(&stats),
        latest,
    };

    std::thread::Builder::new()
        .name("liveguard-pipeline".into())
        .spawn(move || {
            tracing::info!("pipeline thread started");
            load(&mut pipeline);
            tracing::info!(snapshot = ?pipeline.registry().snapshot(), "model loading finished");

            while let Some(Job { permit, frame }) = rx.blocking_recv() {
                let sequence = frame.sequence();
                let started = Instant::now();
                let outcome = pipeline.run_admitted(permit, frame);
                let elapsed = started.elapsed();
                if elapsed > opts.slow_pass {
                    tracing::warn!(
                        seq = sequence,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "slow pipeline pass"
                    );
                }

                let published = match outcome {
                    PassOutcome::Verdict(verdict) => {
                        PipelineStats::bump(&stats.verdicts);
                        Published::Verdict(verdict)
                    }
                    PassOutcome::Failed { sequence, error } => {
                        PipelineStats::bump(&stats.failures);
                        Published::Failed {
                            sequence,
                            error: error.to_string(),
                        }
                    }
                    PassOutcome::NotReady | PassOutcome::Dropped => {
                        PipelineStats::bump(&stats.not_ready);
                        continue;
                    }
                };
                publish.send_replace(Some(published));
            }
            tracing::info!("pipeline thread exiting");
        })
        .map_err(|source| EngineError::Spawn {
            name: "pipeline",
            source,
        })?;

    Ok(handle)
}

/// Pull frames from `source` and submit them until it is exhausted or the
/// pipeline goes away. Source errors skip the frame. Returns the number of
/// frames pulled.
pub fn run_source<S: FrameSource>(mut source: S, handle: &PipelineHandle, interval: Duration) -> u64 {
    let mut delivered = 0u64;
    loop {
        match source.next_frame() {
            Ok(Some(frame)) => {
                delivered += 1;
                if handle.submit(frame) == SubmitOutcome::Closed {
                    tracing::warn!("pipeline closed, stopping frame delivery");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => tracing::warn!(error = %e, "frame source error, skipping"),
        }
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
    tracing::info!(delivered, "frame source finished");
    delivered
}

/// Run [`run_source`] on a named capture thread.
pub fn spawn_source<S>(
    source: S,
    handle: PipelineHandle,
    interval: Duration,
) -> Result<std::thread::JoinHandle<u64>, EngineError>
where
    S: FrameSource + 'static,
{
    std::thread::Builder::new()
        .name("liveguard-capture".into())
        .spawn(move || run_source(source, &handle, interval))
        .map_err(|source| EngineError::Spawn {
            name: "capture",
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveguard_core::{
        EngineKind, EngineState, FaceBox, InferenceEngine, InferenceError, LoadError, Status,
    };
    use liveguard_hw::{ConvertedBuffer, PixelFormat, SourceError, VecSource};
    use std::sync::mpsc as std_mpsc;

    struct TestDetector {
        faces: Vec<FaceBox>,
        /// When set, each detection waits for one message.
        hold: Option<std_mpsc::Receiver<()>>,
    }

    impl InferenceEngine for TestDetector {
        type Config = ();

        fn kind(&self) -> EngineKind {
            EngineKind::Detector
        }

        fn load(&mut self, _config: &()) -> Result<(), LoadError> {
            Ok(())
        }
    }

    impl FaceDetector for TestDetector {
        fn detect_faces(
            &mut self,
            _buffer: &ConvertedBuffer,
            _orientation: i32,
        ) -> Result<Vec<FaceBox>, InferenceError> {
            if let Some(hold) = &self.hold {
                let _ = hold.recv();
            }
            Ok(self.faces.clone())
        }
    }

    struct TestLiveness {
        score: f32,
        fail_load: bool,
    }

    impl InferenceEngine for TestLiveness {
        type Config = ();

        fn kind(&self) -> EngineKind {
            EngineKind::Liveness
        }

        fn load(&mut self, _config: &()) -> Result<(), LoadError> {
            if self.fail_load {
                Err(LoadError::ModelNotFound("liveness.onnx".into()))
            } else {
                Ok(())
            }
        }
    }

    impl LivenessDetector for TestLiveness {
        fn score_liveness(
            &mut self,
            _buffer: &ConvertedBuffer,
            _orientation: i32,
            _face: &FaceBox,
        ) -> Result<f32, InferenceError> {
            Ok(self.score)
        }
    }

    fn frame(sequence: u64) -> Frame {
        Frame::from_packed(PixelFormat::Bgra, 2, 2, vec![128u8; 16])
            .unwrap()
            .with_sequence(sequence)
    }

    fn spawn(detector: TestDetector, liveness: TestLiveness) -> PipelineHandle {
        let pipeline = InferencePipeline::new(
            detector,
            liveness,
            Arc::new(ModelRegistry::new()),
            Arc::new(FrameGate::new()),
        );
        let handle = spawn_pipeline(
            pipeline,
            |p| {
                p.load_models(|| Ok(()), || Ok(()));
            },
            PipelineOptions::default(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let registry = handle.registry();
        while !EngineKind::ALL
            .iter()
            .all(|k| registry.state(*k).is_terminal())
        {
            assert!(Instant::now() < deadline, "models never finished loading");
            std::thread::sleep(Duration::from_millis(1));
        }
        handle
    }

    async fn next_published(rx: &mut watch::Receiver<Option<Published>>) -> Published {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("timed out waiting for publication")
            .expect("pipeline closed");
        rx.borrow_and_update().clone().expect("published value")
    }

    #[tokio::test]
    async fn test_verdict_published_after_gate_release() {
        let handle = spawn(
            TestDetector {
                faces: vec![FaceBox::new(0, 0, 1, 1, 0.9)],
                hold: None,
            },
            TestLiveness {
                score: 0.95,
                fail_load: false,
            },
        );
        let mut rx = handle.subscribe();

        assert_eq!(handle.submit(frame(11)), SubmitOutcome::Admitted);
        match next_published(&mut rx).await {
            Published::Verdict(v) => {
                assert_eq!(v.status, Status::Real);
                assert_eq!(v.sequence, 11);
            }
            other => panic!("expected verdict, got {other:?}"),
        }
        assert!(!handle.gate().is_busy());
        assert_eq!(handle.stats().verdicts, 1);
        assert!(matches!(handle.latest(), Some(Published::Verdict(_))));
    }

    #[tokio::test]
    async fn test_frames_dropped_while_pass_in_flight() {
        let (release, hold) = std_mpsc::channel();
        let handle = spawn(
            TestDetector {
                faces: vec![],
                hold: Some(hold),
            },
            TestLiveness {
                score: 0.0,
                fail_load: false,
            },
        );
        let mut rx = handle.subscribe();

        assert_eq!(handle.submit(frame(1)), SubmitOutcome::Admitted);
        assert_eq!(handle.submit(frame(2)), SubmitOutcome::Dropped);
        assert_eq!(handle.submit(frame(3)), SubmitOutcome::Dropped);

        release.send(()).unwrap();
        match next_published(&mut rx).await {
            Published::Verdict(v) => {
                assert_eq!(v.status, Status::NoFace);
                assert_eq!(v.sequence, 1);
            }
            other => panic!("expected verdict, got {other:?}"),
        }

        let stats = handle.stats();
        assert_eq!((stats.admitted, stats.dropped, stats.verdicts), (1, 2, 1));

        // The gate is free again.
        release.send(()).unwrap();
        assert_eq!(handle.submit(frame(4)), SubmitOutcome::Admitted);
        let v = next_published(&mut rx).await;
        assert!(matches!(v, Published::Verdict(ref v) if v.sequence == 4));
    }

    #[test]
    fn test_failed_liveness_load_yields_no_verdict() {
        let handle = spawn(
            TestDetector {
                faces: vec![FaceBox::new(0, 0, 1, 1, 0.9)],
                hold: None,
            },
            TestLiveness {
                score: 0.99,
                fail_load: true,
            },
        );

        assert_eq!(handle.registry().state(EngineKind::Detector), EngineState::Ready);
        assert!(matches!(
            handle.registry().state(EngineKind::Liveness),
            EngineState::Failed(_)
        ));

        for seq in 0..3 {
            assert_eq!(handle.submit(frame(seq)), SubmitOutcome::NotReady);
            assert!(!handle.gate().is_busy());
        }
        assert_eq!(handle.latest(), None);
        assert_eq!(handle.stats().not_ready, 3);
        assert_eq!(handle.stats().admitted, 0);
    }

    struct FlakySource {
        script: Vec<Result<Option<Frame>, SourceError>>,
    }

    impl FrameSource for FlakySource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.script.is_empty() {
                return Ok(None);
            }
            self.script.remove(0)
        }
    }

    #[tokio::test]
    async fn test_run_source_skips_errors() {
        let handle = spawn(
            TestDetector {
                faces: vec![],
                hold: None,
            },
            TestLiveness {
                score: 0.0,
                fail_load: false,
            },
        );
        let mut rx = handle.subscribe();

        let source = FlakySource {
            script: vec![
                Err(SourceError::DirectoryNotFound("/gone".into())),
                Ok(Some(frame(5))),
            ],
        };
        let delivered = run_source(source, &handle, Duration::ZERO);
        assert_eq!(delivered, 1);

        let published = next_published(&mut rx).await;
        assert!(matches!(published, Published::Verdict(ref v) if v.sequence == 5));
    }

    #[test]
    fn test_run_source_exhausts_vec_source() {
        let handle = spawn(
            TestDetector {
                faces: vec![],
                hold: None,
            },
            TestLiveness {
                score: 0.0,
                fail_load: true,
            },
        );
        let delivered = run_source(
            VecSource::new((0..4).map(frame)),
            &handle,
            Duration::ZERO,
        );
        assert_eq!(delivered, 4);
        assert_eq!(handle.stats().not_ready, 4);
    }

    #[test]
    fn test_closed_pipeline_not_counted_as_admitted() {
        let registry = Arc::new(ModelRegistry::new());
        for kind in EngineKind::ALL {
            registry.begin_load(kind);
            registry.complete_load(kind, Ok(())).unwrap();
        }
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (_publish, latest) = watch::channel(None);
        let handle = PipelineHandle {
            tx,
            gate: Arc::new(FrameGate::new()),
            registry,
            stats: Arc::new(PipelineStats::default()),
            latest,
        };

        assert_eq!(handle.submit(frame(1)), SubmitOutcome::Closed);
        assert!(!handle.gate().is_busy());
        assert_eq!(handle.stats().admitted, 0);
    }

    #[test]
    fn test_published_json_shape() {
        let failed = Published::Failed {
            sequence: 9,
            error: "face detection failed: boom".into(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["sequence"], 9);

        let verdict = Published::Verdict(Verdict::no_face(3));
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["outcome"], "verdict");
        assert_eq!(json["status"], "no_face");
    }
}
