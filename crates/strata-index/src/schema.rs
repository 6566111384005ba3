//! Physical schema diffing and alteration.

use strata_schema::ColumnModel;

use crate::shard::PhysicalTable;

/// One physical column change: add (`old` absent), drop (`new` absent), or
/// alter (both present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChangeDetails {
    /// The column being removed or replaced.
    pub old_column: Option<ColumnModel>,
    /// The column being added or substituted.
    pub new_column: Option<ColumnModel>,
}

impl ColumnChangeDetails {
    /// An addition.
    #[must_use]
    pub fn add(new_column: ColumnModel) -> Self {
        Self {
            old_column: None,
            new_column: Some(new_column),
        }
    }

    /// A removal.
    #[must_use]
    pub fn drop(old_column: ColumnModel) -> Self {
        Self {
            old_column: Some(old_column),
            new_column: None,
        }
    }

    /// A replacement that preserves row data under the new column id.
    #[must_use]
    pub fn alter(old_column: ColumnModel, new_column: ColumnModel) -> Self {
        Self {
            old_column: Some(old_column),
            new_column: Some(new_column),
        }
    }
}

/// Computes the minimal change set that replaces `current` with `desired`.
///
/// Definitions are content-addressed, so a column with the same id is
/// already identical; the diff reduces to drops and adds. Order changes
/// alone produce an empty diff - ordering is carried by the schema hash,
/// not by physical changes.
#[must_use]
pub fn diff_schema(current: &[ColumnModel], desired: &[ColumnModel]) -> Vec<ColumnChangeDetails> {
    let mut changes = Vec::new();
    for column in current {
        if !desired.iter().any(|d| d.id == column.id) {
            changes.push(ColumnChangeDetails::drop(column.clone()));
        }
    }
    for column in desired {
        if !current.iter().any(|c| c.id == column.id) {
            changes.push(ColumnChangeDetails::add(column.clone()));
        }
    }
    changes
}

/// Applies physical column changes to a table. Returns true when anything
/// actually changed.
///
/// An alter whose old column does not exist in the index degrades to an
/// add; a drop of a missing column is a no-op.
pub fn apply_changes(table: &mut PhysicalTable, changes: &[ColumnChangeDetails]) -> bool {
    let mut changed = false;
    for change in changes {
        match (&change.old_column, &change.new_column) {
            (None, None) => {}
            (None, Some(new_column)) => {
                changed |= add_column(table, new_column);
            }
            (Some(old_column), None) => {
                if let Some(position) =
                    table.columns.iter().position(|c| c.id == old_column.id)
                {
                    table.columns.remove(position);
                    for row in table.rows.values_mut() {
                        row.cells.remove(&old_column.id);
                    }
                    table
                        .secondary_indices
                        .retain(|idx| idx.column_id != old_column.id);
                    changed = true;
                }
            }
            (Some(old_column), Some(new_column)) => {
                if old_column.id == new_column.id {
                    continue;
                }
                match table.columns.iter().position(|c| c.id == old_column.id) {
                    Some(position) => {
                        table.columns[position] = new_column.clone();
                        for row in table.rows.values_mut() {
                            if let Some(value) = row.cells.remove(&old_column.id) {
                                row.cells.insert(new_column.id, value);
                            }
                        }
                        for idx in &mut table.secondary_indices {
                            if idx.column_id == old_column.id {
                                idx.column_id = new_column.id;
                                idx.name = format!("idx_{}", new_column.id);
                            }
                        }
                        changed = true;
                    }
                    // The column to update does not exist: degrade to add.
                    None => changed |= add_column(table, new_column),
                }
            }
        }
    }
    changed
}

fn add_column(table: &mut PhysicalTable, new_column: &ColumnModel) -> bool {
    if table.columns.iter().any(|c| c.id == new_column.id) {
        return false;
    }
    table.columns.push(new_column.clone());
    // Existing rows take the new column's default, as a relational ALTER
    // with a DEFAULT clause would.
    if new_column.default_value.is_some() {
        for row in table.rows.values_mut() {
            row.cells
                .insert(new_column.id, new_column.default_value.clone());
        }
    }
    true
}
