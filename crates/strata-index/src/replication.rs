//! External replication source boundary for view population.

use std::collections::{BTreeMap, BTreeSet};

use strata_common::types::{ColumnId, RowId};

/// One row offered by the replication source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedRow {
    /// The replicated object's row id within the view.
    pub row_id: RowId,
    /// The container the object lives in; matched against the view
    /// scope's container set.
    pub container_id: u64,
    /// Sub-type bit of the object; matched against the scope's type mask.
    pub type_bit: u64,
    /// Cell values keyed by column.
    pub cells: BTreeMap<ColumnId, Option<String>>,
}

/// Supplies replicated entity rows for materialized and file views.
///
/// This is the boundary to the entity replication store; the index manager
/// only filters by scope and copies what it is given.
pub trait ReplicationSource: Send + Sync {
    /// Returns every replicated row of `object_type` within any of the
    /// given containers.
    fn rows_in_containers(
        &self,
        containers: &BTreeSet<u64>,
        object_type: &str,
    ) -> Vec<ReplicatedRow>;
}
