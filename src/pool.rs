//! Thread-pool selection.
//!
//! Scheduling across nodes is out of scope; this module only supplies the
//! small, local registry of two `tokio` runtime handles `CollectTask::start`
//! spawns onto, and the routing rule that decides which one a given phase
//! uses.

use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::config::CollectConfig;
use crate::phase::{Phase, RowGranularity};

/// Which pool class a phase is scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolClass {
    /// Short-lived requests: node- or shard-local reads that are expected to
    /// complete quickly.
    Get,
    /// Long-running collects: document tables, information schema,
    /// cluster-level or partitioned reads, and anything not routed at all.
    Search,
}

/// A routed phase whose maximum row granularity is node or shard runs on
/// the short-request `Get`-class pool; otherwise it runs on the
/// long-running `Search`-class pool. Non-routed phases also use the long
/// pool.
pub fn pool_class_for(phase: &Phase) -> PoolClass {
    match phase {
        Phase::Routed {
            max_row_granularity, ..
        } => match max_row_granularity {
            RowGranularity::Node | RowGranularity::Shard => PoolClass::Get,
            RowGranularity::Doc | RowGranularity::Partition | RowGranularity::Cluster => {
                PoolClass::Search
            }
        },
        Phase::NonRouted { .. } => PoolClass::Search,
        Phase::SystemTable { .. } => PoolClass::Search,
    }
}

/// A pair of runtime handles standing in for the node's real thread pools.
/// Both may point at the same runtime in tests; in a real deployment the
/// `search` handle would be backed by a pool sized for long-running,
/// blocking-capable work while `get` is tuned for short requests.
#[derive(Clone)]
pub struct ThreadPools {
    get: Handle,
    search: Handle,
    // Keeps a dedicated search runtime alive for the life of this handle
    // pair when built via `from_config`; unused otherwise.
    _search_runtime: Option<Arc<Runtime>>,
}

impl ThreadPools {
    pub fn new(get: Handle, search: Handle) -> Self {
        ThreadPools {
            get,
            search,
            _search_runtime: None,
        }
    }

    /// Builds a `ThreadPools` with both classes backed by the handle of
    /// whichever runtime is currently entered. Convenient for tests and for
    /// deployments that don't yet distinguish the two pools.
    pub fn current() -> Self {
        let handle = Handle::current();
        ThreadPools {
            get: handle.clone(),
            search: handle,
            _search_runtime: None,
        }
    }

    /// Builds a `ThreadPools` whose `search` class runs on its own
    /// multi-thread runtime, sized by `config.search_pool_threads`, while
    /// `get` reuses the handle of whichever runtime is currently entered.
    pub fn from_config(config: &CollectConfig) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.search_pool_threads.max(1))
            .thread_name("search-pool")
            .enable_all()
            .build()?;
        let search = runtime.handle().clone();
        Ok(ThreadPools {
            get: Handle::current(),
            search,
            _search_runtime: Some(Arc::new(runtime)),
        })
    }

    pub fn handle_for(&self, class: PoolClass) -> &Handle {
        match class {
            PoolClass::Get => &self.get,
            PoolClass::Search => &self.search,
        }
    }

    /// Spawns `task` on the pool `phase` is routed to.
    pub fn spawn_for(&self, phase: &Phase, task: impl FnOnce() + Send + 'static) {
        self.handle_for(pool_class_for(phase)).spawn_blocking(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PhaseId;
    use std::sync::Arc;

    fn routed(g: RowGranularity) -> Phase {
        Phase::Routed {
            id: PhaseId::nil(),
            name: Arc::from("t"),
            max_row_granularity: g,
        }
    }

    #[test]
    fn node_and_shard_use_get_pool() {
        assert_eq!(pool_class_for(&routed(RowGranularity::Node)), PoolClass::Get);
        assert_eq!(pool_class_for(&routed(RowGranularity::Shard)), PoolClass::Get);
    }

    #[test]
    fn doc_partition_cluster_use_search_pool() {
        assert_eq!(pool_class_for(&routed(RowGranularity::Doc)), PoolClass::Search);
        assert_eq!(pool_class_for(&routed(RowGranularity::Partition)), PoolClass::Search);
        assert_eq!(pool_class_for(&routed(RowGranularity::Cluster)), PoolClass::Search);
    }

    #[test]
    fn non_routed_uses_search_pool() {
        let phase = Phase::NonRouted {
            id: PhaseId::nil(),
            name: Arc::from("values"),
        };
        assert_eq!(pool_class_for(&phase), PoolClass::Search);
    }

    #[tokio::test]
    async fn from_config_spawns_onto_a_dedicated_search_runtime() {
        use crate::config::CollectConfig;

        let config = CollectConfig::new("node-1");
        let pools = ThreadPools::from_config(&config).expect("runtime builds");
        let phase = Phase::NonRouted {
            id: PhaseId::nil(),
            name: Arc::from("t"),
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        pools.spawn_for(&phase, move || {
            let _ = tx.send(42);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }
}
