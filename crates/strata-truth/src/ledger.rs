//! Table transaction ledger, snapshots, view scopes, and the
//! view/source-table dependency map.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use strata_common::types::{RowVersion, SnapshotId, TableId, TableIdAndVersion, TransactionId};
use strata_common::{StrataError, StrataResult};

/// One logical table transaction: a group of truth changes made together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTransaction {
    /// Monotonically increasing id, usable for by-table retention.
    pub transaction_id: TransactionId,
    /// The table the transaction wrote to.
    pub table_id: TableId,
    /// Principal that started the transaction.
    pub started_by: String,
    /// When the transaction started.
    pub started_on: DateTime<Utc>,
}

/// An immutable pointer to an externally persisted copy of a table's full
/// contents at one version. Unique per `(table, version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    /// Snapshot record id.
    pub snapshot_id: SnapshotId,
    /// The table snapshotted.
    pub table_id: TableId,
    /// The table version the snapshot captures.
    pub version: RowVersion,
    /// Principal that created the snapshot.
    pub created_by: String,
    /// When the snapshot was created.
    pub created_on: DateTime<Utc>,
    /// Blob storage bucket of the persisted copy.
    pub bucket: String,
    /// Blob storage key of the persisted copy.
    pub key: String,
}

/// Which external entities feed a materialized or file view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewScope {
    /// The view.
    pub view_id: TableId,
    /// Container entities whose children feed the view.
    pub scope_container_ids: BTreeSet<u64>,
    /// The replicated object type the view projects.
    pub object_type: String,
    /// Bitmask refining which sub-types are included.
    pub type_mask: u64,
    /// Rotates on every scope mutation so dependents can detect changes.
    pub etag: String,
}

/// Records logical transactions per table, links them to table versions,
/// and tracks snapshot and view-dependency metadata.
pub struct TransactionLedger {
    next_transaction_id: RwLock<TransactionId>,
    next_snapshot_id: RwLock<SnapshotId>,
    transactions: RwLock<BTreeMap<TransactionId, TableTransaction>>,
    /// transaction -> table version link (one per snapshot-able version).
    version_links: RwLock<HashMap<TransactionId, RowVersion>>,
    snapshots: RwLock<HashMap<(TableId, RowVersion), TableSnapshot>>,
    scopes: RwLock<HashMap<TableId, ViewScope>>,
    /// view (at version) -> the source tables (at versions) it reads.
    view_sources: RwLock<HashMap<TableIdAndVersion, BTreeSet<TableIdAndVersion>>>,
}

impl TransactionLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_transaction_id: RwLock::new(TransactionId::new(1)),
            next_snapshot_id: RwLock::new(SnapshotId::new(1)),
            transactions: RwLock::new(BTreeMap::new()),
            version_links: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            scopes: RwLock::new(HashMap::new()),
            view_sources: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Starts a transaction record for a table.
    pub fn start_transaction(&self, table_id: TableId, started_by: &str) -> TableTransaction {
        let mut next = self.next_transaction_id.write();
        let id = *next;
        *next = next.next();
        let transaction = TableTransaction {
            transaction_id: id,
            table_id,
            started_by: started_by.to_string(),
            started_on: Utc::now(),
        };
        self.transactions.write().insert(id, transaction.clone());
        transaction
    }

    /// Looks up a transaction.
    pub fn get_transaction(&self, id: TransactionId) -> StrataResult<TableTransaction> {
        self.transactions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StrataError::not_found(format!("transaction {id}")))
    }

    /// Links a transaction to the table version it produced. A
    /// transaction links to at most one version.
    pub fn link_version(&self, id: TransactionId, version: RowVersion) -> StrataResult<()> {
        // Validate the transaction exists first.
        self.get_transaction(id)?;
        let mut links = self.version_links.write();
        if let Some(existing) = links.get(&id) {
            if *existing != version {
                return Err(StrataError::invalid_argument(format!(
                    "transaction {id} is already linked to version {existing}"
                )));
            }
            return Ok(());
        }
        links.insert(id, version);
        Ok(())
    }

    /// The version a transaction is linked to, if any.
    #[must_use]
    pub fn linked_version(&self, id: TransactionId) -> Option<RowVersion> {
        self.version_links.read().get(&id).copied()
    }

    /// The transaction that produced a table version, if one was linked.
    #[must_use]
    pub fn transaction_for_version(
        &self,
        table_id: TableId,
        version: RowVersion,
    ) -> Option<TableTransaction> {
        let links = self.version_links.read();
        let transactions = self.transactions.read();
        links
            .iter()
            .filter(|(_, v)| **v == version)
            .filter_map(|(id, _)| transactions.get(id))
            .find(|t| t.table_id == table_id)
            .cloned()
    }

    /// All transactions for a table, oldest first.
    #[must_use]
    pub fn list_transactions(&self, table_id: TableId) -> Vec<TableTransaction> {
        self.transactions
            .read()
            .values()
            .filter(|t| t.table_id == table_id)
            .cloned()
            .collect()
    }

    /// Deletes every transaction record for a table (retention by table).
    /// Returns the number deleted.
    pub fn delete_transactions_for_table(&self, table_id: TableId) -> usize {
        let mut transactions = self.transactions.write();
        let doomed: Vec<TransactionId> = transactions
            .values()
            .filter(|t| t.table_id == table_id)
            .map(|t| t.transaction_id)
            .collect();
        let mut links = self.version_links.write();
        for id in &doomed {
            transactions.remove(id);
            links.remove(id);
        }
        doomed.len()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Records a snapshot pointer. Each `(table, version)` pair may have
    /// at most one snapshot.
    pub fn create_snapshot(
        &self,
        table_id: TableId,
        version: RowVersion,
        created_by: &str,
        bucket: &str,
        key: &str,
    ) -> StrataResult<TableSnapshot> {
        let mut snapshots = self.snapshots.write();
        if snapshots.contains_key(&(table_id, version)) {
            return Err(StrataError::invalid_argument(format!(
                "snapshot already exists for table {table_id} version {version}"
            )));
        }
        let mut next = self.next_snapshot_id.write();
        let id = *next;
        *next = SnapshotId::new(next.as_u64() + 1);
        let snapshot = TableSnapshot {
            snapshot_id: id,
            table_id,
            version,
            created_by: created_by.to_string(),
            created_on: Utc::now(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        snapshots.insert((table_id, version), snapshot.clone());
        Ok(snapshot)
    }

    /// Looks up the snapshot for a table version.
    pub fn get_snapshot(
        &self,
        table_id: TableId,
        version: RowVersion,
    ) -> StrataResult<TableSnapshot> {
        self.snapshots
            .read()
            .get(&(table_id, version))
            .cloned()
            .ok_or_else(|| {
                StrataError::not_found(format!("snapshot for table {table_id} version {version}"))
            })
    }

    // =========================================================================
    // View scopes and source-table dependencies
    // =========================================================================

    /// Creates or replaces a view's scope, rotating its etag.
    pub fn set_view_scope(
        &self,
        view_id: TableId,
        scope_container_ids: BTreeSet<u64>,
        object_type: &str,
        type_mask: u64,
    ) -> ViewScope {
        let scope = ViewScope {
            view_id,
            scope_container_ids,
            object_type: object_type.to_string(),
            type_mask,
            etag: Uuid::new_v4().to_string(),
        };
        self.scopes.write().insert(view_id, scope.clone());
        scope
    }

    /// Looks up a view's scope.
    pub fn get_view_scope(&self, view_id: TableId) -> StrataResult<ViewScope> {
        self.scopes
            .read()
            .get(&view_id)
            .cloned()
            .ok_or_else(|| StrataError::not_found(format!("scope for view {view_id}")))
    }

    /// Replaces the set of source tables a view (at a version) reads.
    pub fn bind_view_sources(
        &self,
        view: TableIdAndVersion,
        sources: BTreeSet<TableIdAndVersion>,
    ) {
        self.view_sources.write().insert(view, sources);
    }

    /// Answers "which views depend on this table", for invalidation
    /// fan-out when the table changes.
    #[must_use]
    pub fn views_depending_on(&self, table_id: TableId) -> Vec<TableIdAndVersion> {
        self.view_sources
            .read()
            .iter()
            .filter(|(_, sources)| sources.iter().any(|s| s.table_id == table_id))
            .map(|(view, _)| *view)
            .collect()
    }
}

impl Default for TransactionLedger {
    fn default() -> Self {
        Self::new()
    }
}
