//! Business logic services.
//!
//! Services orchestrate the store, the advisory locks and the backend
//! strategy, and provide the engine's public operations: build, activate,
//! prune, deep-read queries, resolution and reporting materialization.

mod build;
mod deep_read;
mod registry;
mod reporting;
mod resolution;

pub use build::BuildService;
pub use deep_read::{DeepReadService, RelationCache};
pub use registry::RegistryService;
pub use reporting::ReportingService;
pub use resolution::ResolutionService;

use crate::config::OrgdeepConfig;
use crate::storage::{HierarchyStore, KeyedMutex};
use crate::Result;
use std::sync::Arc;

/// The fully wired engine: every service over one shared store, lock table
/// and read cache.
///
/// This is the entry point for the CLI and for embedding callers; the
/// individual services stay independently constructible for finer wiring.
pub struct Engine {
    /// The shared store. Exposed for loaders and fixtures that populate the
    /// edge store and catalog on the engine's behalf.
    pub store: Arc<HierarchyStore>,
    /// Builder for closure and snapshot builds.
    pub builds: BuildService,
    /// Build registry: activation and pruning.
    pub registry: RegistryService,
    /// The deep-read query facade.
    pub deep_read: Arc<DeepReadService>,
    /// Attribute and security-group resolution.
    pub resolution: ResolutionService,
    /// Reporting-node materializer.
    pub reporting: ReportingService,
}

impl Engine {
    /// Opens the engine against the configured database path.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or initialized.
    pub fn open(config: &OrgdeepConfig) -> Result<Self> {
        Ok(Self::with_store(
            HierarchyStore::new(&config.db_path)?,
            config,
        ))
    }

    /// Opens the engine against an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be initialized.
    pub fn in_memory(config: &OrgdeepConfig) -> Result<Self> {
        Ok(Self::with_store(HierarchyStore::in_memory()?, config))
    }

    /// Wires every service over the given store.
    #[must_use]
    pub fn with_store(store: HierarchyStore, config: &OrgdeepConfig) -> Self {
        let store = Arc::new(store);
        let locks = Arc::new(KeyedMutex::new());
        let cache = Arc::new(RelationCache::new(config.cache_capacity));

        let deep_read = Arc::new(DeepReadService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.default_backend,
        ));

        Self {
            builds: BuildService::new(
                Arc::clone(&store),
                Arc::clone(&locks),
                Arc::clone(&cache),
            ),
            registry: RegistryService::new(
                Arc::clone(&store),
                Arc::clone(&locks),
                Arc::clone(&cache),
            ),
            resolution: ResolutionService::new(Arc::clone(&store), Arc::clone(&deep_read)),
            reporting: ReportingService::new(Arc::clone(&store), locks),
            deep_read,
            store,
        }
    }
}
