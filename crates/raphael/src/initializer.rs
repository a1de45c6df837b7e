//! One-time backend initialization.
//!
//! The first operation that needs the backend translates the connection
//! settings, opens the backend and creates tables for every registered shadow
//! model. Concurrent first callers serialize on an async gate and re-check
//! readiness after acquiring it, so the sequence runs exactly once per
//! successful initialization. A failed attempt leaves the initializer
//! unready and the next caller retries from the start.
//!
//! Models first used after initialization get an additive
//! `CREATE TABLE IF NOT EXISTS` pass of their own.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};

use asupersync::sync::Mutex;
use raphael_core::{Cx, Error, InitStage, Outcome, RaphaelConfig, translate};
use raphael_schema::ShadowModel;

use crate::backend::{Backend, BackendOptions};

pub struct BackendInitializer {
    ready: AtomicBool,
    gate: Mutex<()>,
    materialized: RwLock<HashSet<String>>,
    pending: StdMutex<Vec<Arc<ShadowModel>>>,
    runs: AtomicUsize,
}

impl std::fmt::Debug for BackendInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendInitializer")
            .field("ready", &self.is_ready())
            .field("runs", &self.runs())
            .finish_non_exhaustive()
    }
}

impl Default for BackendInitializer {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendInitializer {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            gate: Mutex::new(()),
            materialized: RwLock::new(HashSet::new()),
            pending: StdMutex::new(Vec::new()),
            runs: AtomicUsize::new(0),
        }
    }

    /// Queue a shadow model for the initial schema pass.
    pub fn register(&self, shadow: Arc<ShadowModel>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending
            .iter()
            .any(|p| p.qualified_name() == shadow.qualified_name())
        {
            pending.push(shadow);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether the table for `qualified_name` has been created.
    pub fn is_materialized(&self, qualified_name: &str) -> bool {
        self.materialized
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(qualified_name)
    }

    /// Number of completed initialization sequences (0 or 1).
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::Acquire)
    }

    fn satisfied(&self, shadow: Option<&Arc<ShadowModel>>) -> bool {
        self.is_ready() && shadow.is_none_or(|s| self.is_materialized(s.qualified_name()))
    }

    fn record(&self, models: &[Arc<ShadowModel>]) {
        let mut done = self
            .materialized
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for model in models {
            done.insert(model.qualified_name().to_string());
        }
    }

    /// Make sure the backend is open and `shadow`'s table exists.
    pub async fn ensure_ready<B: Backend>(
        &self,
        cx: &Cx,
        backend: &B,
        config: &RaphaelConfig,
        options: &BackendOptions,
        shadow: Option<&Arc<ShadowModel>>,
    ) -> Outcome<(), Error> {
        if self.satisfied(shadow) {
            return Outcome::Ok(());
        }

        let Ok(_guard) = self.gate.lock(cx).await else {
            return Outcome::Err(Error::Connection(
                "Failed to acquire initialization lock".to_string(),
            ));
        };
        if self.satisfied(shadow) {
            return Outcome::Ok(());
        }

        if !self.is_ready() {
            let target = match translate(&config.database) {
                Ok(target) => target,
                Err(e) => return Outcome::Err(e),
            };

            match backend.open(cx, &target, options).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => {
                    tracing::warn!(error = %e, "Backend connection failed");
                    return Outcome::Err(Error::initialization(InitStage::Connect, e));
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }

            let mut models = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(shadow) = shadow {
                if !models
                    .iter()
                    .any(|m| m.qualified_name() == shadow.qualified_name())
                {
                    models.push(Arc::clone(shadow));
                }
            }

            match backend.materialize(cx, &models).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => {
                    tracing::warn!(error = %e, "Schema creation failed");
                    return Outcome::Err(Error::initialization(InitStage::Schema, e));
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }

            self.record(&models);
            self.runs.fetch_add(1, Ordering::AcqRel);
            self.ready.store(true, Ordering::Release);
            tracing::info!(url = %target, models = models.len(), "Backend initialized");
            return Outcome::Ok(());
        }

        let Some(shadow) = shadow else {
            return Outcome::Ok(());
        };
        let late = [Arc::clone(shadow)];
        match backend.materialize(cx, &late).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(Error::initialization(InitStage::Schema, e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.record(&late);
        tracing::info!(model = shadow.qualified_name(), "Materialized late model");
        Outcome::Ok(())
    }
}
