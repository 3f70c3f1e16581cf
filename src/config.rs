//! Ambient configuration. Loading config from a file or environment is out
//! of scope; this struct only carries the handful of knobs the core's own
//! operations consult.

use std::sync::Arc;

/// The thin slice of node configuration `CollectTask` needs.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// This node's name, threaded into receiver error messages and tracing
    /// spans.
    pub node_name: Arc<str>,
    /// Worker thread count for the dedicated runtime `ThreadPools::from_config`
    /// builds for the `search` pool class.
    pub search_pool_threads: usize,
}

impl CollectConfig {
    pub fn new(node_name: impl Into<Arc<str>>) -> Self {
        CollectConfig {
            node_name: node_name.into(),
            search_pool_threads: 4,
        }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        CollectConfig::new("node-1")
    }
}
