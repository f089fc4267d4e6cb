//! Single-slot frame admission.
//!
//! At most one frame is in flight at a time. A frame that arrives while the
//! gate is busy is dropped immediately: no queue, no blocking, no retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct FrameGate {
    busy: AtomicBool,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the gate busy if it is idle. `false` means drop the frame.
    pub fn try_admit(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clear the busy flag. Returns `false` (and logs) if the gate was idle,
    /// which means some caller released twice.
    pub fn release(&self) -> bool {
        let was_busy = self.busy.swap(false, Ordering::AcqRel);
        if !was_busy {
            tracing::warn!("frame gate released while idle");
        }
        was_busy
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Scoped admission: the returned permit releases the gate exactly once,
    /// when it is released or dropped (including during unwinding).
    pub fn admit(self: &Arc<Self>) -> Option<GatePermit> {
        self.try_admit().then(|| GatePermit {
            gate: Arc::clone(self),
        })
    }
}

/// Proof that a frame was admitted. Releases the gate on drop.
#[must_use = "dropping the permit releases the gate immediately"]
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<FrameGate>,
}

impl GatePermit {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
