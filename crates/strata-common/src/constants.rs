//! System-wide constants for the Strata table engine.

// =============================================================================
// Cell and Row Limits
// =============================================================================

/// Maximum length, in characters, of a text cell value.
///
/// Larger payloads belong in blob storage behind a file-reference column.
pub const MAX_TEXT_LENGTH: usize = 2000;

/// Maximum rendered size, in bytes, of a boolean cell ("false").
pub const MAX_BOOLEAN_BYTES_AS_TEXT: usize = 5;

/// Maximum rendered size, in bytes, of a 64-bit integer cell.
pub const MAX_INTEGER_BYTES_AS_TEXT: usize = 20;

/// Maximum rendered size, in bytes, of a double cell.
pub const MAX_DOUBLE_BYTES_AS_TEXT: usize = 24;

/// Maximum rendered size, in bytes, of a date cell (epoch milliseconds).
pub const MAX_DATE_BYTES_AS_TEXT: usize = 20;

/// Maximum rendered size, in bytes, of a file-reference cell.
pub const MAX_FILE_REF_BYTES_AS_TEXT: usize = 20;

/// Maximum rendered size, in bytes, of a link cell.
pub const MAX_LINK_BYTES_AS_TEXT: usize = 1000;

// =============================================================================
// Change-Set Blob Format
// =============================================================================

/// Header token for the row id column of a change-set blob or CSV upload.
pub const ROW_ID_HEADER: &str = "ROW_ID";

/// Header token for the row version column.
pub const ROW_VERSION_HEADER: &str = "ROW_VERSION";

/// Header token for the optional row etag column.
pub const ROW_ETAG_HEADER: &str = "ROW_ETAG";

/// UTF-8 byte-order-marker that must be stripped from the first header
/// token of uploaded CSV data before comparison.
pub const UTF8_BOM: &str = "\u{feff}";

// =============================================================================
// Query Limits
// =============================================================================

/// Maximum rows returned per query page. A full page triggers a
/// continuation token.
pub const MAX_ROWS_PER_PAGE: usize = 100;

/// Maximum byte budget for a single query response.
pub const MAX_BYTES_PER_REQUEST: usize = 512 * 1024;

/// Maximum number of distinct values returned for an enumeration facet.
pub const MAX_FACET_CATEGORIES: usize = 100;

/// Rendered stand-in for a null cell in facet value-count results only.
/// Stored blobs never use it; there an empty field means unset.
pub const NULL_VALUE_KEYWORD: &str = "::NULL::";

/// Sentinel benefactor id appended to every access filter so the rewritten
/// `IN` list is never empty. No real row carries it.
pub const BENEFACTOR_SENTINEL: i64 = -1;

// =============================================================================
// Index Limits
// =============================================================================

/// Maximum number of secondary indices maintained per table, below the
/// shard engine's hard ceiling to leave room for system indices.
pub const MAX_SECONDARY_INDEX_COUNT: usize = 60;

// =============================================================================
// Status Limits
// =============================================================================

/// Maximum stored length of a status error message. Longer messages are
/// truncated, never rejected.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_byte_budgets_cover_rendered_values() {
        assert!(i64::MIN.to_string().len() <= MAX_INTEGER_BYTES_AS_TEXT);
        assert!("false".len() <= MAX_BOOLEAN_BYTES_AS_TEXT);
        assert!(format!("{:e}", f64::MIN).len() <= MAX_DOUBLE_BYTES_AS_TEXT);
    }
}
