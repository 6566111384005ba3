//! Column and schema registry for Strata.
//!
//! Column definitions are immutable and content-addressed: the column id is
//! derived from a hash of the definition, so creating the same definition
//! twice yields the same id. Tables and views bind an ordered list of
//! column ids, and the bound list is hashed into the "schema hash" that the
//! index manager compares against the truth.

mod column;
mod registry;

pub use column::{
    max_bytes_as_text, validate_cell_value, ColumnModel, ColumnType, FacetType,
};
pub use registry::{ColumnRegistry, SchemaChangeListener};

use sha2::{Digest, Sha256};
use strata_common::types::ColumnId;

/// Computes the schema hash for an ordered list of column ids.
///
/// The hash covers the ids and their order; two bindings with the same
/// columns in a different order hash differently. The index stores this
/// value and must match the truth's current binding before a table is
/// reported available.
#[must_use]
pub fn schema_hash(column_ids: &[ColumnId]) -> String {
    let mut hasher = Sha256::new();
    for (i, id) in column_ids.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(id.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_hash_is_order_sensitive() {
        let a = ColumnId::new(1);
        let b = ColumnId::new(2);
        assert_ne!(schema_hash(&[a, b]), schema_hash(&[b, a]));
        assert_eq!(schema_hash(&[a, b]), schema_hash(&[a, b]));
    }

    #[test]
    fn test_schema_hash_empty() {
        assert_eq!(schema_hash(&[]).len(), 64);
    }
}
