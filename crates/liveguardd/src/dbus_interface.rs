use crate::engine::PipelineHandle;
use zbus::interface;

/// D-Bus interface for the Liveguard liveness daemon.
///
/// Bus name: org.freedesktop.Liveguard1
/// Object path: /org/freedesktop/Liveguard1
pub struct LivenessService {
    handle: PipelineHandle,
}

impl LivenessService {
    pub fn new(handle: PipelineHandle) -> Self {
        Self { handle }
    }

    fn status_json(&self) -> serde_json::Value {
        let snapshot = self.handle.registry().snapshot();
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "detector": snapshot.detector,
            "liveness": snapshot.liveness,
            "ready": self.handle.registry().all_ready(),
            "gate_busy": self.handle.gate().is_busy(),
            "stats": self.handle.stats(),
        })
    }
}

#[interface(name = "org.freedesktop.Liveguard1")]
impl LivenessService {
    /// Return daemon status: model states, gate and pipeline counters.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().to_string())
    }

    /// Return the most recent outcome as JSON, or `null` before the first one.
    async fn last_verdict(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.handle.latest())
            .map_err(|e| zbus::fdo::Error::Failed(format!("serialize verdict: {e}")))
    }
}
