//! Change-set blob codec.
//!
//! Change sets are persisted as gzip-compressed, headered, comma-separated
//! text:
//!
//! ```text
//! ROW_ID,ROW_VERSION[,ROW_ETAG],<column-id>,<column-id>,...
//! 0,0,alpha,42
//! 1,0,,
//! 2,0
//! ```
//!
//! An unquoted empty field means *unset* (null); a quoted empty field
//! (`""`) is an empty string. A record carrying only the id/version
//! prefix is a deletion marker. Fields containing commas, quotes, or
//! newlines are quoted with doubled-quote escaping. A UTF-8 byte order
//! marker on the first header token is stripped before comparison.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use strata_common::constants::{ROW_ETAG_HEADER, ROW_ID_HEADER, ROW_VERSION_HEADER, UTF8_BOM};
use strata_common::types::ColumnId;
use strata_common::{StrataError, StrataResult};
use strata_schema::{validate_cell_value, ColumnModel};

use crate::model::{ColumnChange, Row, RowSet};

/// Serializes a validated change set into a compressed blob.
///
/// Every cell is validated (and canonicalized) against its column model as
/// it is written; a cell that is unset picks up the column's default. Row
/// ids and versions must already be assigned.
pub fn write_change_set(columns: &[ColumnModel], set: &RowSet) -> StrataResult<Bytes> {
    if columns.len() != set.header.len() {
        return Err(StrataError::invalid_argument(format!(
            "row set header has {} columns but the table schema has {}",
            set.header.len(),
            columns.len()
        )));
    }
    for (model, header_id) in columns.iter().zip(&set.header) {
        if model.id != *header_id {
            return Err(StrataError::invalid_argument(format!(
                "row set header column {header_id} does not match schema column {}",
                model.id
            )));
        }
    }
    let include_etags = set.rows.iter().any(|r| r.etag.is_some());

    let mut text = String::new();
    text.push_str(ROW_ID_HEADER);
    text.push(',');
    text.push_str(ROW_VERSION_HEADER);
    if include_etags {
        text.push(',');
        text.push_str(ROW_ETAG_HEADER);
    }
    for id in &set.header {
        text.push(',');
        text.push_str(&id.to_string());
    }
    text.push('\n');

    for (row_index, row) in set.rows.iter().enumerate() {
        let row_id = row.row_id.ok_or_else(|| {
            StrataError::invalid_argument(format!("row {row_index} has no row id assigned"))
        })?;
        let version = row.version.ok_or_else(|| {
            StrataError::invalid_argument(format!("row {row_index} has no version assigned"))
        })?;
        text.push_str(&row_id.to_string());
        text.push(',');
        text.push_str(&version.to_string());
        if include_etags {
            text.push(',');
            push_field(&mut text, row.etag.as_deref());
        }
        if let Some(values) = &row.values {
            for (column_index, (value, model)) in values.iter().zip(columns).enumerate() {
                let validated =
                    validate_cell_value(value.as_deref(), model, row_index, column_index)?;
                text.push(',');
                push_field(&mut text, validated.as_deref());
            }
        }
        text.push('\n');
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Appends one field to `out`, quoting when necessary.
fn push_field(out: &mut String, value: Option<&str>) {
    match value {
        None => {}
        Some(v) => {
            let needs_quoting =
                v.is_empty() || v.contains(',') || v.contains('"') || v.contains('\n');
            if needs_quoting {
                out.push('"');
                for c in v.chars() {
                    if c == '"' {
                        out.push('"');
                    }
                    out.push(c);
                }
                out.push('"');
            } else {
                out.push_str(v);
            }
        }
    }
}

/// Deserializes a change-set blob back into its header and rows.
pub fn read_change_set(blob: &[u8]) -> StrataResult<(Vec<ColumnId>, Vec<Row>)> {
    let mut decoder = GzDecoder::new(blob);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;

    let mut records = parse_records(&text)?.into_iter();
    let header_record = records
        .next()
        .ok_or_else(|| StrataError::corruption("change-set blob has no header"))?;

    let mut fields = header_record.iter();
    let first = fields
        .next()
        .map(|f| f.as_deref().unwrap_or("").trim_start_matches(UTF8_BOM))
        .unwrap_or("");
    if first != ROW_ID_HEADER {
        return Err(StrataError::corruption(format!(
            "change-set blob header starts with '{first}', expected '{ROW_ID_HEADER}'"
        )));
    }
    if fields.next().map(|f| f.as_deref()) != Some(Some(ROW_VERSION_HEADER)) {
        return Err(StrataError::corruption(format!(
            "change-set blob header is missing '{ROW_VERSION_HEADER}'"
        )));
    }
    let remaining: Vec<&str> = fields.map(|f| f.as_deref().unwrap_or("")).collect();
    let has_etags = remaining.first() == Some(&ROW_ETAG_HEADER);
    let column_tokens = if has_etags { &remaining[1..] } else { &remaining[..] };
    let header: Vec<ColumnId> = column_tokens
        .iter()
        .map(|token| {
            ColumnId::parse_hex(token).map_err(|_| {
                StrataError::corruption(format!("'{token}' is not a valid column id"))
            })
        })
        .collect::<StrataResult<_>>()?;

    let prefix_len = if has_etags { 3 } else { 2 };
    let mut rows = Vec::new();
    for record in records {
        if record.len() < 2 {
            return Err(StrataError::corruption(
                "change-set record has fewer than two fields",
            ));
        }
        let row_id = record[0]
            .as_deref()
            .unwrap_or("")
            .parse()
            .map_err(|_| StrataError::corruption("unparsable row id in change set"))?;
        let version = record[1]
            .as_deref()
            .unwrap_or("")
            .parse()
            .map_err(|_| StrataError::corruption("unparsable row version in change set"))?;
        let etag = if has_etags && record.len() > 2 {
            record[2].clone()
        } else {
            None
        };
        let values = if record.len() <= prefix_len {
            // Only the id/version(/etag) prefix: a deletion marker.
            None
        } else {
            let mut cells: Vec<Option<String>> = record[prefix_len..].to_vec();
            cells.resize(header.len(), None);
            Some(cells)
        };
        rows.push(Row {
            row_id: Some(row_id),
            version: Some(version),
            etag,
            values,
        });
    }
    Ok((header, rows))
}

/// Serializes a schema-change list into a compressed blob.
pub fn write_schema_change(changes: &[ColumnChange]) -> StrataResult<Bytes> {
    let json = serde_json::to_vec(changes)
        .map_err(|e| StrataError::internal(format!("schema change encoding failed: {e}")))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Deserializes a schema-change blob.
pub fn read_schema_change(blob: &[u8]) -> StrataResult<Vec<ColumnChange>> {
    let mut decoder = GzDecoder::new(blob);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    serde_json::from_slice(&json)
        .map_err(|e| StrataError::corruption(format!("schema change blob unreadable: {e}")))
}

/// Splits text into records of fields, honoring quoting.
///
/// `None` fields were written unquoted-empty (unset); `Some("")` fields
/// were written as `""` (empty string).
fn parse_records(text: &str) -> StrataResult<Vec<Vec<Option<String>>>> {
    let mut records = Vec::new();
    let mut record: Vec<Option<String>> = Vec::new();
    let mut field = String::new();
    let mut field_was_quoted = false;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    let flush_field =
        |record: &mut Vec<Option<String>>, field: &mut String, field_was_quoted: &mut bool| {
            if field.is_empty() && !*field_was_quoted {
                record.push(None);
            } else {
                record.push(Some(std::mem::take(field)));
            }
            field.clear();
            *field_was_quoted = false;
        };

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else {
            match c {
                '"' => {
                    in_quotes = true;
                    field_was_quoted = true;
                }
                ',' => flush_field(&mut record, &mut field, &mut field_was_quoted),
                '\n' => {
                    flush_field(&mut record, &mut field, &mut field_was_quoted);
                    records.push(std::mem::take(&mut record));
                }
                '\r' => {}
                other => field.push(other),
            }
        }
    }
    if in_quotes {
        return Err(StrataError::corruption("unterminated quoted field"));
    }
    if !field.is_empty() || field_was_quoted || !record.is_empty() {
        flush_field(&mut record, &mut field, &mut field_was_quoted);
        records.push(record);
    }
    Ok(records)
}
