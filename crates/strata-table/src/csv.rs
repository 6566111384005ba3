//! CSV upload and download boundary.
//!
//! The iterator consumes CSV input with a declared header-is-first-line
//! flag and an optional number of lines to skip. It supports column
//! reordering relative to file order, missing trailing columns (unset,
//! not an error), and an explicit `ROW_ID`/`ROW_VERSION`/`ROW_ETAG`
//! triple for update-vs-insert-vs-delete disambiguation: a data row with
//! only `ROW_ID` and `ROW_VERSION` present, and no other cells, is a
//! deletion.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};

use strata_common::constants::{ROW_ETAG_HEADER, ROW_ID_HEADER, ROW_VERSION_HEADER, UTF8_BOM};
use strata_common::{StrataError, StrataResult};
use strata_schema::ColumnModel;
use strata_truth::SparseRow;

/// Where each file column lands.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldTarget {
    RowId,
    RowVersion,
    RowEtag,
    /// Index into the declared schema.
    Column(usize),
    /// An empty header token: the file column is ignored.
    Ignored,
}

/// Iterates uploaded CSV data as sparse rows.
#[derive(Debug)]
pub struct CsvRowIterator<R: Read> {
    lines: std::io::Lines<BufReader<R>>,
    columns: Vec<ColumnModel>,
    targets: Vec<FieldTarget>,
    line_number: usize,
}

impl<R: Read> CsvRowIterator<R> {
    /// Creates an iterator over `reader`.
    ///
    /// `lines_to_skip` lines are discarded first. When
    /// `first_line_is_header` is set the next line is resolved as a
    /// header (column names or ids, in any order); otherwise the file's
    /// columns are taken positionally as `ROW_ID, ROW_VERSION,
    /// <schema order>`.
    pub fn new(
        reader: R,
        columns: &[ColumnModel],
        first_line_is_header: bool,
        lines_to_skip: usize,
    ) -> StrataResult<Self> {
        let mut lines = BufReader::new(reader).lines();
        let mut line_number = 0;
        for _ in 0..lines_to_skip {
            line_number += 1;
            if lines.next().transpose()?.is_none() {
                break;
            }
        }
        let targets = if first_line_is_header {
            line_number += 1;
            let header = lines.next().transpose()?.ok_or_else(|| {
                StrataError::invalid_argument("CSV input ended before the declared header line")
            })?;
            resolve_header(&split_fields(&header), columns)?
        } else {
            let mut targets = vec![FieldTarget::RowId, FieldTarget::RowVersion];
            targets.extend((0..columns.len()).map(FieldTarget::Column));
            targets
        };
        Ok(Self {
            lines,
            columns: columns.to_vec(),
            targets,
            line_number,
        })
    }

    fn parse_line(&self, line: &str) -> StrataResult<SparseRow> {
        let fields = split_fields(line);
        let mut row = SparseRow::default();
        let mut values: BTreeMap<_, _> = BTreeMap::new();
        let mut any_cell_present = false;
        for (target, field) in self.targets.iter().zip(fields.iter()) {
            match target {
                FieldTarget::RowId => {
                    if let Some(raw) = field {
                        row.row_id = Some(raw.parse().map_err(|_| {
                            StrataError::invalid_argument(format!(
                                "line {}: '{raw}' is not a valid {ROW_ID_HEADER}",
                                self.line_number
                            ))
                        })?);
                    }
                }
                FieldTarget::RowVersion => {
                    if let Some(raw) = field {
                        row.version = Some(raw.parse().map_err(|_| {
                            StrataError::invalid_argument(format!(
                                "line {}: '{raw}' is not a valid {ROW_VERSION_HEADER}",
                                self.line_number
                            ))
                        })?);
                    }
                }
                FieldTarget::RowEtag => {
                    row.etag = field.clone();
                }
                FieldTarget::Column(index) => {
                    if let Some(value) = field {
                        values.insert(self.columns[*index].id, Some(value.clone()));
                        any_cell_present = true;
                    }
                }
                FieldTarget::Ignored => {}
            }
        }
        // Missing trailing columns are simply unset. A row that names an
        // existing row and version but carries no cells at all is a
        // deletion.
        let is_deletion = row.row_id.is_some() && row.version.is_some() && !any_cell_present;
        row.values = if is_deletion { None } else { Some(values) };
        Ok(row)
    }
}

impl<R: Read> Iterator for CsvRowIterator<R> {
    type Item = StrataResult<SparseRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_number += 1;
            match self.lines.next()? {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(self.parse_line(&line));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Resolves a declared header against the schema.
///
/// Tokens match a column's name or its id rendering; the reserved
/// `ROW_ID`/`ROW_VERSION`/`ROW_ETAG` tokens map to the row triple; an
/// empty token ignores that file column. Anything else is rejected with
/// the offending text.
fn resolve_header(
    tokens: &[Option<String>],
    columns: &[ColumnModel],
) -> StrataResult<Vec<FieldTarget>> {
    let mut targets = Vec::with_capacity(tokens.len());
    for (position, token) in tokens.iter().enumerate() {
        let token = match token {
            None => {
                targets.push(FieldTarget::Ignored);
                continue;
            }
            Some(token) if position == 0 => token.trim_start_matches(UTF8_BOM),
            Some(token) => token.as_str(),
        };
        let target = match token {
            ROW_ID_HEADER => FieldTarget::RowId,
            ROW_VERSION_HEADER => FieldTarget::RowVersion,
            ROW_ETAG_HEADER => FieldTarget::RowEtag,
            other => match columns
                .iter()
                .position(|c| c.name == other || c.id.to_string() == other)
            {
                Some(index) => FieldTarget::Column(index),
                None => {
                    return Err(StrataError::invalid_argument(format!(
                        "CSV header '{other}' does not match any of the table's column names or ids"
                    )))
                }
            },
        };
        targets.push(target);
    }
    Ok(targets)
}

/// Streams query result rows out as CSV.
///
/// The row id and version always lead each record (plus the etag when the
/// rows carry one); cell values follow in select-column order. Used as the
/// download side of the CSV boundary: hand it to the query executor as the
/// row handler and every row is written as it streams.
pub struct CsvWriterRowHandler<W: std::io::Write> {
    writer: W,
    rows_written: usize,
}

impl<W: std::io::Write> CsvWriterRowHandler<W> {
    /// Creates a handler, writing a header line first when
    /// `column_names` is supplied.
    pub fn new(mut writer: W, column_names: Option<&[String]>) -> StrataResult<Self> {
        if let Some(names) = column_names {
            let mut line = format!("{ROW_ID_HEADER},{ROW_VERSION_HEADER}");
            for name in names {
                line.push(',');
                push_csv_field(&mut line, name);
            }
            line.push('\n');
            writer.write_all(line.as_bytes())?;
        }
        Ok(Self {
            writer,
            rows_written: 0,
        })
    }

    /// Rows written so far.
    #[must_use]
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Finishes writing and hands the writer back.
    pub fn into_inner(mut self) -> StrataResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: std::io::Write> strata_query::RowHandler for CsvWriterRowHandler<W> {
    fn on_row(&mut self, row: &strata_query::QueryRow) -> StrataResult<bool> {
        let mut line = format!("{},{}", row.row_id, row.version);
        if let Some(etag) = &row.etag {
            line.push(',');
            push_csv_field(&mut line, etag);
        }
        for value in &row.values {
            line.push(',');
            if let Some(value) = value {
                push_csv_field(&mut line, value);
            }
        }
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.rows_written += 1;
        Ok(true)
    }
}

fn push_csv_field(out: &mut String, value: &str) {
    let needs_quoting =
        value.is_empty() || value.contains(',') || value.contains('"') || value.contains('\n');
    if needs_quoting {
        out.push('"');
        for c in value.chars() {
            if c == '"' {
                out.push('"');
            }
            out.push(c);
        }
        out.push('"');
    } else {
        out.push_str(value);
    }
}

/// Splits one CSV line into fields. An unquoted empty field is unset
/// (`None`); a quoted field is always a value, even when empty.
fn split_fields(line: &str) -> Vec<Option<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
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
                    quoted = true;
                }
                ',' => {
                    fields.push(take_field(&mut field, &mut quoted));
                    quoted = false;
                }
                '\r' => {}
                other => field.push(other),
            }
        }
    }
    fields.push(take_field(&mut field, &mut quoted));
    fields
}

fn take_field(field: &mut String, quoted: &mut bool) -> Option<String> {
    if field.is_empty() && !*quoted {
        None
    } else {
        Some(std::mem::take(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::types::{RowId, RowVersion};
    use strata_schema::ColumnType;

    fn columns() -> Vec<ColumnModel> {
        vec![
            ColumnModel::new("a", ColumnType::Boolean),
            ColumnModel::new("b", ColumnType::Integer),
            ColumnModel::new("c", ColumnType::Text),
        ]
    }

    fn collect(csv: &str, columns: &[ColumnModel], header: bool, skip: usize) -> Vec<SparseRow> {
        CsvRowIterator::new(csv.as_bytes(), columns, header, skip)
            .unwrap()
            .collect::<StrataResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_ignore_unknown_columns_scenario() {
        // Columns {a, b, c}; the file carries c and a (reordered), one
        // ignored column, and the row triple.
        let columns = columns();
        let csv = "ROW_ID,ROW_VERSION,c,,a\n\
                   1,11,AAA,2,\n\
                   ,,CCC,3,false\n\
                   3,10";
        let rows = collect(csv, &columns, true, 0);
        assert_eq!(rows.len(), 3);

        // Row one: update of row 1 at version 11, c=AAA, a unset.
        assert_eq!(rows[0].row_id, Some(RowId::new(1)));
        assert_eq!(rows[0].version, Some(RowVersion::new(11)));
        let values = rows[0].values.as_ref().unwrap();
        assert_eq!(values.get(&columns[2].id), Some(&Some("AAA".to_string())));
        assert!(!values.contains_key(&columns[0].id));
        assert!(!values.contains_key(&columns[1].id));

        // Row two: an insert with c=CCC and a=false.
        assert_eq!(rows[1].row_id, None);
        let values = rows[1].values.as_ref().unwrap();
        assert_eq!(values.get(&columns[2].id), Some(&Some("CCC".to_string())));
        assert_eq!(values.get(&columns[0].id), Some(&Some("false".to_string())));

        // Row three: a pure deletion of row 3 at version 10.
        assert_eq!(rows[2].row_id, Some(RowId::new(3)));
        assert_eq!(rows[2].version, Some(RowVersion::new(10)));
        assert!(rows[2].is_deletion());
    }

    #[test]
    fn test_unknown_header_is_rejected_with_text() {
        let err = CsvRowIterator::new(
            "ROW_ID,ROW_VERSION,mystery\n1,2,x".as_bytes(),
            &columns(),
            true,
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'mystery'"), "{err}");
    }

    #[test]
    fn test_bom_is_stripped_from_first_header_token() {
        let csv = "\u{feff}ROW_ID,ROW_VERSION,a\n7,0,true";
        let rows = collect(csv, &columns(), true, 0);
        assert_eq!(rows[0].row_id, Some(RowId::new(7)));
    }

    #[test]
    fn test_positional_mapping_without_header() {
        let columns = columns();
        let csv = "0,1,true,42,hello";
        let rows = collect(csv, &columns, false, 0);
        let values = rows[0].values.as_ref().unwrap();
        assert_eq!(values.get(&columns[1].id), Some(&Some("42".to_string())));
        assert_eq!(
            values.get(&columns[2].id),
            Some(&Some("hello".to_string()))
        );
    }

    #[test]
    fn test_lines_to_skip() {
        let csv = "garbage line\nanother\nROW_ID,ROW_VERSION,a\n,,true";
        let rows = collect(csv, &columns(), true, 2);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].row_id.is_none());
    }

    #[test]
    fn test_header_by_column_id() {
        let columns = columns();
        let csv = format!("ROW_ID,ROW_VERSION,{}\n,,99", columns[1].id);
        let rows = collect(&csv, &columns, true, 0);
        let values = rows[0].values.as_ref().unwrap();
        assert_eq!(values.get(&columns[1].id), Some(&Some("99".to_string())));
    }

    #[test]
    fn test_missing_trailing_columns_are_unset() {
        let columns = columns();
        let csv = "ROW_ID,ROW_VERSION,a,b,c\n,,true";
        let rows = collect(csv, &columns, true, 0);
        let values = rows[0].values.as_ref().unwrap();
        assert_eq!(values.len(), 1);
        assert!(values.contains_key(&columns[0].id));
    }

    #[test]
    fn test_quoted_fields() {
        let columns = columns();
        let csv = "ROW_ID,ROW_VERSION,c\n,,\"with, comma and \"\"quotes\"\"\"";
        let rows = collect(csv, &columns, true, 0);
        let values = rows[0].values.as_ref().unwrap();
        assert_eq!(
            values.get(&columns[2].id),
            Some(&Some("with, comma and \"quotes\"".to_string()))
        );
    }

    #[test]
    fn test_csv_writer_round_trips_through_reader() {
        use strata_common::types::{RowId, RowVersion};
        use strata_query::RowHandler;

        let columns = columns();
        let mut handler = CsvWriterRowHandler::new(
            Vec::new(),
            Some(&["a".to_string(), "c".to_string()]),
        )
        .unwrap();
        handler
            .on_row(&strata_query::QueryRow {
                row_id: RowId::new(4),
                version: RowVersion::new(2),
                etag: None,
                values: vec![Some("true".to_string()), Some("with, comma".to_string())],
            })
            .unwrap();
        assert_eq!(handler.rows_written(), 1);
        let written = handler.into_inner().unwrap();

        // The download format is valid upload input.
        let rows = collect(std::str::from_utf8(&written).unwrap(), &columns, true, 0);
        assert_eq!(rows[0].row_id, Some(RowId::new(4)));
        let values = rows[0].values.as_ref().unwrap();
        assert_eq!(
            values.get(&columns[2].id),
            Some(&Some("with, comma".to_string()))
        );
    }

    #[test]
    fn test_row_etag_column() {
        let columns = columns();
        let csv = "ROW_ID,ROW_VERSION,ROW_ETAG,a\n5,2,tag-123,true";
        let rows = collect(csv, &columns, true, 0);
        assert_eq!(rows[0].etag, Some("tag-123".to_string()));
        assert!(!rows[0].is_deletion());
    }
}
