//! The sliver of planner/routing vocabulary the core needs to pick a thread
//! pool and to address a phase in logs and errors. Routing itself - which
//! nodes a phase runs on, how shards are assigned - is out of scope; this
//! module only carries what `CollectTask` reads.

use std::sync::Arc;

use crate::error::PhaseId;

/// The coarsest row-granularity a routed phase reads at. Determines which
/// thread pool class the phase is scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowGranularity {
    Node,
    Shard,
    Doc,
    Partition,
    Cluster,
}

/// A single collect phase, as seen by this crate. `Routed` phases were
/// assigned concrete shards/nodes by the planner; `NonRouted` phases (values
/// lists, single-row projections, ...) were not routed anywhere in
/// particular and always run on the long-lived pool.
#[derive(Debug, Clone)]
pub enum Phase {
    Routed {
        id: PhaseId,
        name: Arc<str>,
        max_row_granularity: RowGranularity,
    },
    NonRouted {
        id: PhaseId,
        name: Arc<str>,
    },
    /// A system-table read (`information_schema` / `sys` / `pg_catalog`).
    /// Not shard-routed - the relation lives in memory on every node - but
    /// still a distinct phase kind from `NonRouted` so `SystemCollectSource`
    /// has somewhere to read `schema`/`relation` from.
    SystemTable {
        id: PhaseId,
        name: Arc<str>,
        schema: Arc<str>,
        relation: Arc<str>,
    },
}

impl Phase {
    pub fn id(&self) -> PhaseId {
        match self {
            Phase::Routed { id, .. } => *id,
            Phase::NonRouted { id, .. } => *id,
            Phase::SystemTable { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        match self {
            Phase::Routed { name, .. } => name,
            Phase::NonRouted { name, .. } => name,
            Phase::SystemTable { name, .. } => name,
        }
    }
}
