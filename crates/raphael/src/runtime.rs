//! The process-wide runtime handle.
//!
//! [`Raphael`] owns everything that lives for the life of the process: the
//! configuration, the backend, the shadow-model registry, the initializer and
//! the manager cache. Clones share the same state.

use std::sync::Arc;

use raphael_core::{Cx, Error, Model, Outcome, RaphaelConfig};
use raphael_schema::{ShadowModel, ShadowRegistry};

use crate::backend::{Backend, BackendOptions};
use crate::initializer::BackendInitializer;
use crate::manager::Manager;
use crate::memory::MemoryBackend;
use crate::registry::ManagerRegistry;

#[derive(Debug)]
pub(crate) struct Shared<B> {
    pub(crate) config: RaphaelConfig,
    pub(crate) options: BackendOptions,
    pub(crate) backend: B,
    pub(crate) shadows: ShadowRegistry,
    pub(crate) initializer: BackendInitializer,
    pub(crate) managers: ManagerRegistry,
}

/// Handle to one configured bridge.
///
/// ```ignore
/// let rt = Raphael::memory(RaphaelConfig::new(DatabaseConfig::new("sqlite3").name(":memory:")));
/// let books = rt.manager::<Book>();
/// let dune = books.create(&cx, &[("title", "Dune".into())]).await;
/// ```
#[derive(Debug)]
pub struct Raphael<B: Backend> {
    shared: Arc<Shared<B>>,
}

impl<B: Backend> Clone for Raphael<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Raphael<MemoryBackend> {
    /// A bridge over the in-process backend.
    pub fn memory(config: RaphaelConfig) -> Self {
        Self::new(config, MemoryBackend::new())
    }
}

impl<B: Backend> Raphael<B> {
    pub fn new(config: RaphaelConfig, backend: B) -> Self {
        let options = BackendOptions::from_config(&config);
        Self {
            shared: Arc::new(Shared {
                config,
                options,
                backend,
                shadows: ShadowRegistry::new(),
                initializer: BackendInitializer::new(),
                managers: ManagerRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &RaphaelConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn shadows(&self) -> &ShadowRegistry {
        &self.shared.shadows
    }

    pub fn initializer(&self) -> &BackendInitializer {
        &self.shared.initializer
    }

    pub fn is_ready(&self) -> bool {
        self.shared.initializer.is_ready()
    }

    /// Build `M`'s shadow model and include it in the first schema pass.
    pub fn register<M: Model>(&self) -> Arc<ShadowModel> {
        let shadow = self.shared.shadows.for_model::<M>();
        self.shared.initializer.register(Arc::clone(&shadow));
        shadow
    }

    /// The async manager for `M`, created on first request.
    pub fn manager<M: Model>(&self) -> Arc<Manager<M, B>> {
        self.shared.managers.get_or_insert_with(|| {
            let shadow = self.shared.shadows.for_model::<M>();
            Manager::new(Arc::clone(&self.shared), shadow)
        })
    }

    /// Open the backend and create tables for registered models.
    pub async fn ensure_ready(&self, cx: &Cx) -> Outcome<(), Error> {
        let shared = &self.shared;
        shared
            .initializer
            .ensure_ready(cx, &shared.backend, &shared.config, &shared.options, None)
            .await
    }

    /// Release the backend's connections. Safe to call more than once.
    ///
    /// Readiness is not reset: managers keep using the closed backend and
    /// see its connection errors.
    pub async fn close(&self, cx: &Cx) -> Outcome<(), Error> {
        match self.shared.backend.close(cx).await {
            Outcome::Ok(()) => {
                tracing::info!("Raphael runtime closed");
                Outcome::Ok(())
            }
            other => other,
        }
    }
}
