//! Row, row-set, and change-set models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_common::types::{ColumnId, RowId, RowVersion, TableId};
use strata_common::{StrataError, StrataResult};
use strata_schema::ColumnModel;

/// What kind of change a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// A batch of row inserts/updates/deletes.
    Row,
    /// A schema change (column add/alter/remove).
    Column,
}

/// One ledger record: a change set applied to a table's truth.
///
/// Immutable once written. `row_version` values per table form a dense,
/// strictly increasing sequence starting at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRowChange {
    /// The table this change belongs to.
    pub table_id: TableId,
    /// The version assigned to the whole change set.
    pub row_version: RowVersion,
    /// Row data or schema change.
    pub change_type: ChangeType,
    /// Principal that made the change.
    pub created_by: String,
    /// When the change was recorded.
    pub created_on: DateTime<Utc>,
    /// Ordered column ids of the serialized blob.
    pub header: Vec<ColumnId>,
    /// Blob storage bucket.
    pub bucket: String,
    /// Blob storage key.
    pub key: String,
    /// Etag issued with the reservation that produced this change.
    pub etag: String,
    /// Number of rows in the change set.
    pub row_count: usize,
}

/// One dense row under a shared header.
///
/// `values` is `None` for a deletion marker (row id and version present,
/// values absent); individual cells are `None` when unset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    /// Row id; `None` for a new row awaiting assignment.
    pub row_id: Option<RowId>,
    /// Version; assigned when the change set is appended.
    pub version: Option<RowVersion>,
    /// Optional per-row etag for conflict checks.
    pub etag: Option<String>,
    /// Cell values in header order; `None` marks a deletion row.
    pub values: Option<Vec<Option<String>>>,
}

impl Row {
    /// A new insert row with the given cells.
    #[must_use]
    pub fn insert(values: Vec<Option<String>>) -> Self {
        Self {
            values: Some(values),
            ..Default::default()
        }
    }

    /// An update row: existing id, the version the caller last read, and
    /// the full replacement cells.
    #[must_use]
    pub fn update(row_id: RowId, version: RowVersion, values: Vec<Option<String>>) -> Self {
        Self {
            row_id: Some(row_id),
            version: Some(version),
            etag: None,
            values: Some(values),
        }
    }

    /// A deletion marker for an existing row.
    #[must_use]
    pub fn delete(row_id: RowId, version: RowVersion) -> Self {
        Self {
            row_id: Some(row_id),
            version: Some(version),
            etag: None,
            values: None,
        }
    }

    /// True when this row deletes rather than writes.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.values.is_none()
    }
}

/// Rows grouped under a shared ordered header and table id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSet {
    /// The owning table.
    pub table_id: TableId,
    /// Ordered column ids describing `rows`' values.
    pub header: Vec<ColumnId>,
    /// Etag of the last change the caller read, for conflict checks.
    pub etag: Option<String>,
    /// The rows.
    pub rows: Vec<Row>,
}

impl RowSet {
    /// Creates a row set.
    #[must_use]
    pub fn new(table_id: TableId, header: Vec<ColumnId>, rows: Vec<Row>) -> Self {
        Self {
            table_id,
            header,
            etag: None,
            rows,
        }
    }

    /// Basic shape validation: at least one row, and every non-deletion
    /// row's cell count matches the header.
    pub fn validate(&self) -> StrataResult<()> {
        if self.rows.is_empty() {
            return Err(StrataError::invalid_argument(
                "row set must contain at least one row",
            ));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(values) = &row.values {
                if values.len() != self.header.len() {
                    return Err(StrataError::invalid_argument(format!(
                        "row {i} has {} values but the header has {} columns",
                        values.len(),
                        self.header.len()
                    )));
                }
            } else if row.row_id.is_none() {
                return Err(StrataError::invalid_argument(format!(
                    "row {i} is a deletion but carries no row id"
                )));
            }
        }
        Ok(())
    }

    /// Counts rows that need a fresh row id.
    #[must_use]
    pub fn count_rows_needing_ids(&self) -> usize {
        self.rows.iter().filter(|r| r.row_id.is_none()).count()
    }

    /// Maps each existing (update/delete) row id to the version it carries.
    #[must_use]
    pub fn existing_row_versions(&self) -> BTreeMap<RowId, Option<RowVersion>> {
        self.rows
            .iter()
            .filter_map(|r| r.row_id.map(|id| (id, r.version)))
            .collect()
    }
}

/// A sparse row: values addressed by column id, distinguishing *unset*
/// (key absent) from an explicit write of null (key present, value `None`).
/// `values == None` is a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SparseRow {
    /// Row id; `None` for inserts.
    pub row_id: Option<RowId>,
    /// The version the caller last read, for updates.
    pub version: Option<RowVersion>,
    /// Optional per-row etag.
    pub etag: Option<String>,
    /// Cell writes by column; `None` marks a deletion row.
    pub values: Option<BTreeMap<ColumnId, Option<String>>>,
}

impl SparseRow {
    /// True when this row deletes rather than writes.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.values.is_none()
    }
}

/// Sparse rows for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseChangeSet {
    /// The owning table.
    pub table_id: TableId,
    /// Etag of the last change the caller read.
    pub etag: Option<String>,
    /// The sparse rows.
    pub rows: Vec<SparseRow>,
}

/// Result of reserving id/version capacity for a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRange {
    /// Lowest fresh row id, when any were reserved.
    pub minimum_id: Option<RowId>,
    /// Highest fresh row id, when any were reserved.
    pub maximum_id: Option<RowId>,
    /// Highest row id that existed before this reservation; update rows
    /// may not reference anything above it. `None` when the table was
    /// empty.
    pub maximum_update_id: Option<RowId>,
    /// The version assigned to the whole change set.
    pub version: RowVersion,
    /// Fresh etag identifying this reservation.
    pub etag: String,
}

/// A `(row id, version)` pair identifying one written row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowReference {
    /// The row.
    pub row_id: RowId,
    /// The version the row was written at.
    pub version: RowVersion,
}

/// The references produced by appending one change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowReferenceSet {
    /// The table written to.
    pub table_id: TableId,
    /// The header the change set was written under.
    pub header: Vec<ColumnId>,
    /// The reservation etag.
    pub etag: String,
    /// One reference per row, in change-set order.
    pub rows: Vec<RowReference>,
}

/// One column-level schema change, recorded in a `Column` ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChange {
    /// The column being replaced or removed; `None` for an addition.
    pub old_column_id: Option<ColumnId>,
    /// The replacement column; `None` for a removal.
    pub new_column_id: Option<ColumnId>,
}

/// Assigns row ids and the change-set version to every row in the set.
///
/// New rows take sequential ids from the reserved range; existing rows
/// must reference an id at or below `maximum_update_id`. Both a missing
/// or exhausted range and an out-of-range update are caller errors.
pub fn assign_ids_and_versions(set: &mut RowSet, range: &IdRange) -> StrataResult<()> {
    set.validate()?;
    let mut next_id = range.minimum_id;
    for row in &mut set.rows {
        row.version = Some(range.version);
        match row.row_id {
            None => {
                let id = next_id.ok_or_else(|| {
                    StrataError::invalid_argument(
                        "row set required at least one allocated row id but none were reserved",
                    )
                })?;
                if let Some(maximum) = range.maximum_id {
                    if id > maximum {
                        return Err(StrataError::invalid_argument(
                            "row set required more row ids than were reserved",
                        ));
                    }
                }
                row.row_id = Some(id);
                next_id = Some(id.next());
            }
            Some(existing) => {
                let in_range = range
                    .maximum_update_id
                    .map(|max| existing <= max)
                    .unwrap_or(false);
                if !in_range {
                    return Err(StrataError::invalid_argument(format!(
                        "cannot update row {existing} because it does not exist"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Re-projects stored row sets onto a requested schema and merges them.
///
/// A column absent from a stored header resolves to the *requested*
/// column's default value - older change sets written before a column
/// existed are still readable. Deletion rows are skipped.
#[must_use]
pub fn convert_to_schema_and_merge(
    sets: &[RowSet],
    result_schema: &[ColumnModel],
    table_id: TableId,
) -> RowSet {
    let header: Vec<ColumnId> = result_schema.iter().map(|c| c.id).collect();
    let mut out = RowSet::new(table_id, header, Vec::new());
    for set in sets {
        let index_of: BTreeMap<ColumnId, usize> = set
            .header
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        for row in &set.rows {
            let Some(values) = &row.values else {
                continue;
            };
            let projected = result_schema
                .iter()
                .map(|column| match index_of.get(&column.id) {
                    Some(&i) => values[i].clone(),
                    None => column.default_value.clone(),
                })
                .collect();
            out.rows.push(Row {
                row_id: row.row_id,
                version: row.version,
                etag: row.etag.clone(),
                values: Some(projected),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::ColumnType;

    fn range(min: u64, max: u64, max_update: Option<u64>, version: u64) -> IdRange {
        IdRange {
            minimum_id: Some(RowId::new(min)),
            maximum_id: Some(RowId::new(max)),
            maximum_update_id: max_update.map(RowId::new),
            version: RowVersion::new(version),
            etag: "etag-0".to_string(),
        }
    }

    fn insert_rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::insert(vec![Some(format!("v{i}"))]))
            .collect()
    }

    #[test]
    fn test_assign_ids_to_new_rows() {
        let header = vec![ColumnId::new(1)];
        let mut set = RowSet::new(TableId::new(1), header, insert_rows(3));
        assign_ids_and_versions(&mut set, &range(0, 2, None, 0)).unwrap();
        let ids: Vec<u64> = set.rows.iter().map(|r| r.row_id.unwrap().as_u64()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(set
            .rows
            .iter()
            .all(|r| r.version == Some(RowVersion::new(0))));
    }

    #[test]
    fn test_assign_fails_without_reserved_ids() {
        let header = vec![ColumnId::new(1)];
        let mut set = RowSet::new(TableId::new(1), header, insert_rows(1));
        let empty_range = IdRange {
            minimum_id: None,
            maximum_id: None,
            maximum_update_id: Some(RowId::new(5)),
            version: RowVersion::new(1),
            etag: "etag-1".to_string(),
        };
        let err = assign_ids_and_versions(&mut set, &empty_range).unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
    }

    #[test]
    fn test_assign_rejects_update_beyond_existing_rows() {
        let header = vec![ColumnId::new(1)];
        let rows = vec![Row::update(
            RowId::new(10),
            RowVersion::new(0),
            vec![Some("x".to_string())],
        )];
        let mut set = RowSet::new(TableId::new(1), header, rows);
        let err = assign_ids_and_versions(&mut set, &range(11, 11, Some(9), 1)).unwrap_err();
        assert!(err.to_string().contains("row 10"), "{err}");
    }

    #[test]
    fn test_assign_rejects_update_on_empty_table() {
        let header = vec![ColumnId::new(1)];
        let rows = vec![Row::update(
            RowId::new(0),
            RowVersion::new(0),
            vec![Some("x".to_string())],
        )];
        let mut set = RowSet::new(TableId::new(1), header, rows);
        let err = assign_ids_and_versions(&mut set, &range(0, 0, None, 0)).unwrap_err();
        assert!(matches!(err, StrataError::InvalidArgument { .. }));
    }

    #[test]
    fn test_validate_rejects_ragged_rows() {
        let header = vec![ColumnId::new(1), ColumnId::new(2)];
        let set = RowSet::new(
            TableId::new(1),
            header,
            vec![Row::insert(vec![Some("only-one".to_string())])],
        );
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_deletion_row_shape() {
        let row = Row::delete(RowId::new(3), RowVersion::new(10));
        assert!(row.is_deletion());
        let set = RowSet::new(TableId::new(1), vec![ColumnId::new(1)], vec![row]);
        set.validate().unwrap();
    }

    #[test]
    fn test_convert_to_schema_and_merge() {
        // First change set written under columns {one (default "defaultOne"),
        // two (no default)}.
        let one = ColumnModel::new("one", ColumnType::Text).with_default("defaultOne");
        let two = ColumnModel::new("two", ColumnType::Text);
        let mut v0 = RowSet::new(
            TableId::new(123),
            vec![one.id, two.id],
            vec![
                Row::insert(vec![Some("string0".to_string()), Some("string0".to_string())]),
                Row::insert(vec![Some("string1".to_string()), Some("string1".to_string())]),
            ],
        );
        assign_ids_and_versions(&mut v0, &range(0, 1, None, 0)).unwrap();

        // Column two is dropped; three (boolean, no default) and four
        // (default "default4") are added.
        let three = ColumnModel::new("three", ColumnType::Boolean);
        let four = ColumnModel::new("four", ColumnType::Text).with_default("default4");
        let mut v1 = RowSet::new(
            TableId::new(123),
            vec![one.id, three.id, four.id],
            vec![
                Row::insert(vec![
                    Some("string0".to_string()),
                    Some("false".to_string()),
                    Some("string0".to_string()),
                ]),
                Row::insert(vec![
                    Some("string1".to_string()),
                    Some("true".to_string()),
                    Some("string1".to_string()),
                ]),
            ],
        );
        assign_ids_and_versions(&mut v1, &range(2, 3, Some(1), 1)).unwrap();

        // Re-project everything onto {four, one, three}.
        let merged = convert_to_schema_and_merge(
            &[v0, v1],
            &[four.clone(), one.clone(), three.clone()],
            TableId::new(123),
        );
        assert_eq!(merged.header, vec![four.id, one.id, three.id]);
        let values: Vec<_> = merged.rows.iter().map(|r| r.values.clone().unwrap()).collect();
        // Old rows: four falls back to its default, three to null.
        assert_eq!(
            values[0],
            vec![
                Some("default4".to_string()),
                Some("string0".to_string()),
                None
            ]
        );
        assert_eq!(
            values[1],
            vec![
                Some("default4".to_string()),
                Some("string1".to_string()),
                None
            ]
        );
        // New rows: stored values pass through.
        assert_eq!(
            values[2],
            vec![
                Some("string0".to_string()),
                Some("string0".to_string()),
                Some("false".to_string())
            ]
        );
        assert_eq!(
            values[3],
            vec![
                Some("string1".to_string()),
                Some("string1".to_string()),
                Some("true".to_string())
            ]
        );
        assert_eq!(merged.rows[2].row_id, Some(RowId::new(2)));
        assert_eq!(merged.rows[2].version, Some(RowVersion::new(1)));
    }
}
