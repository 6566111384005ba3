//! The column registry: immutable definitions plus per-object bindings.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use strata_common::types::{ColumnId, TableId};
use strata_common::{StrataError, StrataResult};

use crate::column::ColumnModel;

/// Notified whenever an object's bound column list is replaced.
pub trait SchemaChangeListener: Send + Sync {
    /// The object's binding changed; `etag` is the binding's new etag.
    fn schema_changed(&self, object_id: TableId, etag: &str);
}

/// A no-op listener for callers that do not care.
struct NullListener;

impl SchemaChangeListener for NullListener {
    fn schema_changed(&self, _object_id: TableId, _etag: &str) {}
}

/// One object's bound, ordered column list.
#[derive(Debug, Clone)]
struct Binding {
    column_ids: Vec<ColumnId>,
    etag: String,
}

/// Stores immutable, content-addressed column definitions and binds
/// ordered column-id lists to owning tables and views.
///
/// Creation is idempotent: defining the same column twice returns the same
/// id. A definition can only be deleted while nothing is bound to it.
pub struct ColumnRegistry {
    columns: RwLock<HashMap<ColumnId, ColumnModel>>,
    bindings: RwLock<BTreeMap<TableId, Binding>>,
    listener: Arc<dyn SchemaChangeListener>,
}

impl ColumnRegistry {
    /// Creates an empty registry with no change listener.
    #[must_use]
    pub fn new() -> Self {
        Self::with_listener(Arc::new(NullListener))
    }

    /// Creates an empty registry that notifies `listener` on rebinds.
    #[must_use]
    pub fn with_listener(listener: Arc<dyn SchemaChangeListener>) -> Self {
        Self {
            columns: RwLock::new(HashMap::new()),
            bindings: RwLock::new(BTreeMap::new()),
            listener,
        }
    }

    /// Registers a column definition, returning its derived id.
    ///
    /// Re-registering an identical definition is a no-op that returns the
    /// existing id.
    pub fn create_column(&self, model: ColumnModel) -> ColumnId {
        let id = model.id;
        self.columns.write().entry(id).or_insert(model);
        id
    }

    /// Looks up one column definition.
    pub fn get_column(&self, id: ColumnId) -> StrataResult<ColumnModel> {
        self.columns
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StrataError::not_found(format!("column {id}")))
    }

    /// Looks up several column definitions, preserving order.
    pub fn get_columns(&self, ids: &[ColumnId]) -> StrataResult<Vec<ColumnModel>> {
        ids.iter().map(|id| self.get_column(*id)).collect()
    }

    /// Deletes a column definition. Fails while any object binds it.
    pub fn delete_column(&self, id: ColumnId) -> StrataResult<()> {
        let bound_to = self.list_objects_bound_to_column(id);
        if !bound_to.is_empty() {
            return Err(StrataError::invalid_argument(format!(
                "column {id} is bound to {} object(s) and cannot be deleted",
                bound_to.len()
            )));
        }
        if self.columns.write().remove(&id).is_none() {
            return Err(StrataError::not_found(format!("column {id}")));
        }
        Ok(())
    }

    /// Replaces the full ordered column list bound to an object.
    ///
    /// Every id must resolve to a registered definition. The binding's etag
    /// rotates and the change listener fires, so dependents (the index
    /// manager in particular) can detect the schema change.
    pub fn bind_columns_to_object(
        &self,
        object_id: TableId,
        column_ids: Vec<ColumnId>,
    ) -> StrataResult<String> {
        {
            let columns = self.columns.read();
            let mut seen = BTreeSet::new();
            for id in &column_ids {
                if !columns.contains_key(id) {
                    return Err(StrataError::not_found(format!("column {id}")));
                }
                if !seen.insert(*id) {
                    return Err(StrataError::invalid_argument(format!(
                        "column {id} appears more than once in the binding"
                    )));
                }
            }
        }
        let etag = Uuid::new_v4().to_string();
        self.bindings.write().insert(
            object_id,
            Binding {
                column_ids,
                etag: etag.clone(),
            },
        );
        debug!(object = %object_id, %etag, "rebound column list");
        self.listener.schema_changed(object_id, &etag);
        Ok(etag)
    }

    /// Returns the ordered column ids bound to an object, empty when the
    /// object has no binding yet.
    #[must_use]
    pub fn get_bound_column_ids(&self, object_id: TableId) -> Vec<ColumnId> {
        self.bindings
            .read()
            .get(&object_id)
            .map(|b| b.column_ids.clone())
            .unwrap_or_default()
    }

    /// Returns the resolved schema bound to an object, in order.
    pub fn get_bound_schema(&self, object_id: TableId) -> StrataResult<Vec<ColumnModel>> {
        let ids = self.get_bound_column_ids(object_id);
        self.get_columns(&ids)
    }

    /// Returns the binding etag for an object, if it has one.
    #[must_use]
    pub fn get_binding_etag(&self, object_id: TableId) -> Option<String> {
        self.bindings.read().get(&object_id).map(|b| b.etag.clone())
    }

    /// Lists every object currently binding the given column.
    #[must_use]
    pub fn list_objects_bound_to_column(&self, id: ColumnId) -> Vec<TableId> {
        self.bindings
            .read()
            .iter()
            .filter(|(_, binding)| binding.column_ids.contains(&id))
            .map(|(object_id, _)| *object_id)
            .collect()
    }
}

impl Default for ColumnRegistry {
    fn default() -> Self {
        Self::new()
    }
}
