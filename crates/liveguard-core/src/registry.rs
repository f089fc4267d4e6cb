//! Model lifecycle registry.
//!
//! Tracks each engine through `Unloaded → Loading → Ready | Failed`.
//! Loading is attempted at most once automatically: a Failed engine stays
//! Failed until [`ModelRegistry::reset`] is called. All transitions happen
//! under one mutex, so concurrent callers can never double-start a load.

use crate::engine::{EngineKind, InferenceEngine, LoadError};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;

/// Why a load failed. Configuration problems are kept apart from engine
/// problems so the UI can tell "missing config" from "broken model".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    ConfigMissing,
    ConfigMalformed,
    ConfigEmpty,
    ModelMissing,
    EngineRejected,
}

impl FailureCode {
    pub fn is_config(self) -> bool {
        matches!(
            self,
            FailureCode::ConfigMissing | FailureCode::ConfigMalformed | FailureCode::ConfigEmpty
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub code: FailureCode,
    pub message: String,
}

impl From<&LoadError> for LoadFailure {
    fn from(err: &LoadError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready,
    /// Sticky until [`ModelRegistry::reset`].
    Failed(LoadFailure),
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Ready | EngineState::Failed(_))
    }
}

/// Result of [`ModelRegistry::begin_load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginLoad {
    /// The engine moved Unloaded → Loading; the caller must now load it
    /// and report back with [`ModelRegistry::complete_load`].
    Started,
    /// No transition; carries the current state.
    Skipped(EngineState),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind}: completeLoad called while {state:?}, expected Loading")]
    NotLoading { kind: EngineKind, state: EngineState },
    #[error("{kind}: cannot reset while a load is in progress")]
    LoadInProgress { kind: EngineKind },
}

/// Readiness of both engines at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub detector: EngineState,
    pub liveness: EngineState,
}

#[derive(Debug)]
pub struct ModelRegistry {
    states: Mutex<[EngineState; 2]>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            states: Mutex::new([EngineState::Unloaded, EngineState::Unloaded]),
        }
    }

    // Every transition is a single assignment, so a poisoned lock still
    // holds a coherent state.
    fn lock(&self) -> MutexGuard<'_, [EngineState; 2]> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, kind: EngineKind) -> EngineState {
        self.lock()[kind.index()].clone()
    }

    /// The only query the pipeline uses to gate inference calls.
    pub fn is_ready(&self, kind: EngineKind) -> bool {
        self.lock()[kind.index()] == EngineState::Ready
    }

    pub fn all_ready(&self) -> bool {
        self.lock().iter().all(|s| *s == EngineState::Ready)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let states = self.lock();
        RegistrySnapshot {
            detector: states[EngineKind::Detector.index()].clone(),
            liveness: states[EngineKind::Liveness.index()].clone(),
        }
    }

    /// Transition Unloaded → Loading. Any other state is left untouched.
    pub fn begin_load(&self, kind: EngineKind) -> BeginLoad {
        let mut states = self.lock();
        let slot = &mut states[kind.index()];
        if *slot == EngineState::Unloaded {
            *slot = EngineState::Loading;
            tracing::info!(engine = %kind, "model load started");
            BeginLoad::Started
        } else {
            tracing::debug!(engine = %kind, state = ?slot, "begin_load skipped");
            BeginLoad::Skipped(slot.clone())
        }
    }

    /// Transition Loading → Ready or Loading → Failed.
    ///
    /// Calling this outside Loading is a logic error: it is logged and
    /// returned, and the state is not changed.
    pub fn complete_load(
        &self,
        kind: EngineKind,
        result: Result<(), LoadError>,
    ) -> Result<EngineState, RegistryError> {
        let mut states = self.lock();
        let slot = &mut states[kind.index()];
        if *slot != EngineState::Loading {
            let err = RegistryError::NotLoading {
                kind,
                state: slot.clone(),
            };
            tracing::error!(engine = %kind, error = %err, "invalid registry transition");
            return Err(err);
        }

        *slot = match result {
            Ok(()) => {
                tracing::info!(engine = %kind, "model ready");
                EngineState::Ready
            }
            Err(err) => {
                let failure = LoadFailure::from(&err);
                tracing::error!(
                    engine = %kind,
                    code = ?failure.code,
                    error = %failure.message,
                    "model load failed"
                );
                EngineState::Failed(failure)
            }
        };
        Ok(slot.clone())
    }

    /// Return an engine to Unloaded so a new load can be attempted.
    pub fn reset(&self, kind: EngineKind) -> Result<(), RegistryError> {
        let mut states = self.lock();
        let slot = &mut states[kind.index()];
        if *slot == EngineState::Loading {
            return Err(RegistryError::LoadInProgress { kind });
        }
        tracing::info!(engine = %kind, previous = ?slot, "engine reset");
        *slot = EngineState::Unloaded;
        Ok(())
    }

    /// Drive one engine through a full load attempt.
    ///
    /// `config` is only evaluated when the load actually starts; its error
    /// fails the load with a configuration reason code. Returns the state
    /// the engine ends in (or the untouched state if no load started).
    pub fn load_engine<E, F>(&self, engine: &mut E, config: F) -> EngineState
    where
        E: InferenceEngine,
        F: FnOnce() -> Result<E::Config, LoadError>,
    {
        let kind = engine.kind();
        if let BeginLoad::Skipped(state) = self.begin_load(kind) {
            return state;
        }

        let started = Instant::now();
        let result = config().and_then(|cfg| engine.load(&cfg));
        tracing::debug!(
            engine = %kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "load attempt finished"
        );

        match self.complete_load(kind, result) {
            Ok(state) => state,
            // Unreachable while reset() refuses Loading; report what is there.
            Err(_) => self.state(kind),
        }
    }
}
