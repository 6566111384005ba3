//! Column definitions and cell validation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use strata_common::constants::{
    MAX_BOOLEAN_BYTES_AS_TEXT, MAX_DATE_BYTES_AS_TEXT, MAX_DOUBLE_BYTES_AS_TEXT,
    MAX_FILE_REF_BYTES_AS_TEXT, MAX_INTEGER_BYTES_AS_TEXT, MAX_LINK_BYTES_AS_TEXT,
    MAX_TEXT_LENGTH,
};
use strata_common::types::ColumnId;
use strata_common::{StrataError, StrataResult};

/// The fixed cell type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// UTF-8 text, bounded by the column's `max_size`.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Double,
    /// Boolean.
    Boolean,
    /// Date as epoch milliseconds.
    Date,
    /// Reference to an externally stored file.
    FileRef,
    /// Link to another entity.
    Link,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::Double => write!(f, "DOUBLE"),
            ColumnType::Boolean => write!(f, "BOOLEAN"),
            ColumnType::Date => write!(f, "DATE"),
            ColumnType::FileRef => write!(f, "FILEREF"),
            ColumnType::Link => write!(f, "LINK"),
        }
    }
}

/// Which facet summarization a column supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetType {
    /// Distinct value + count summarization.
    Enumeration,
    /// Min/max range summarization.
    Range,
}

/// An immutable, content-addressed column definition.
///
/// The id is derived from every other field, so the registry can treat
/// creation as idempotent. Once created a definition never changes;
/// "altering" a column means binding a different definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnModel {
    /// Derived content-hash id.
    pub id: ColumnId,
    /// Display name; also usable as a CSV header.
    pub name: String,
    /// Cell type.
    pub column_type: ColumnType,
    /// Maximum size for `Text` cells; ignored for other types.
    pub max_size: Option<usize>,
    /// Value substituted when a cell is unset.
    pub default_value: Option<String>,
    /// Restricts cells to this closed value set when present.
    pub enum_values: Option<Vec<String>>,
    /// Facet summarization this column supports, if any.
    pub facet_type: Option<FacetType>,
}

impl ColumnModel {
    /// Builds a column definition, deriving its content-addressed id.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let mut model = Self {
            id: ColumnId::new(0),
            name: name.into(),
            column_type,
            max_size: None,
            default_value: None,
            enum_values: None,
            facet_type: None,
        };
        model.id = model.derive_id();
        model
    }

    /// Sets the maximum text size and re-derives the id.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self.id = self.derive_id();
        self
    }

    /// Sets the default value and re-derives the id.
    #[must_use]
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self.id = self.derive_id();
        self
    }

    /// Sets the enumeration values and re-derives the id.
    #[must_use]
    pub fn with_enum_values(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self.id = self.derive_id();
        self
    }

    /// Sets the facet type and re-derives the id.
    #[must_use]
    pub fn with_facet(mut self, facet_type: FacetType) -> Self {
        self.facet_type = Some(facet_type);
        self.id = self.derive_id();
        self
    }

    /// Derives the content-hash id from every field except the id itself.
    ///
    /// The encoding uses explicit field separators so that, for example,
    /// `("ab", "c")` and `("a", "bc")` cannot collide.
    fn derive_id(&self) -> ColumnId {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.column_type.to_string().as_bytes());
        hasher.update([0u8]);
        if let Some(size) = self.max_size {
            hasher.update(size.to_string().as_bytes());
        }
        hasher.update([0u8]);
        if let Some(default) = &self.default_value {
            hasher.update(default.as_bytes());
        }
        hasher.update([0u8]);
        if let Some(values) = &self.enum_values {
            for value in values {
                hasher.update(value.as_bytes());
                hasher.update([1u8]);
            }
        }
        hasher.update([0u8]);
        if let Some(facet) = self.facet_type {
            hasher.update(format!("{facet:?}").as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        ColumnId::new(u64::from_be_bytes(bytes))
    }

    /// The effective maximum length for text cells of this column.
    #[must_use]
    pub fn effective_max_size(&self) -> usize {
        self.max_size.unwrap_or(MAX_TEXT_LENGTH).min(MAX_TEXT_LENGTH)
    }
}

/// Maximum size, in bytes, that a cell of this type can occupy when
/// rendered as text. Used for page-size math.
#[must_use]
pub fn max_bytes_as_text(model: &ColumnModel) -> usize {
    match model.column_type {
        ColumnType::Text => model.effective_max_size() * 4,
        ColumnType::Integer => MAX_INTEGER_BYTES_AS_TEXT,
        ColumnType::Double => MAX_DOUBLE_BYTES_AS_TEXT,
        ColumnType::Boolean => MAX_BOOLEAN_BYTES_AS_TEXT,
        ColumnType::Date => MAX_DATE_BYTES_AS_TEXT,
        ColumnType::FileRef => MAX_FILE_REF_BYTES_AS_TEXT,
        ColumnType::Link => MAX_LINK_BYTES_AS_TEXT,
    }
}

/// Validates and canonicalizes one cell value against its column.
///
/// A `None` value resolves to the column's default (which may itself be
/// `None`, meaning null). Non-null values are coerced to the canonical
/// rendering for the type; failures report the row and column position.
pub fn validate_cell_value(
    value: Option<&str>,
    model: &ColumnModel,
    row_index: usize,
    column_index: usize,
) -> StrataResult<Option<String>> {
    let Some(raw) = value else {
        return Ok(model.default_value.clone());
    };
    let invalid = |detail: String| {
        StrataError::invalid_argument(format!(
            "value at [{row_index},{column_index}] was not a valid {}: {detail}",
            model.column_type
        ))
    };
    if let Some(allowed) = &model.enum_values {
        if !allowed.iter().any(|v| v == raw) {
            return Err(invalid(format!(
                "'{raw}' is not in the column's enumeration"
            )));
        }
    }
    let canonical = match model.column_type {
        ColumnType::Text | ColumnType::Link => {
            let limit = if model.column_type == ColumnType::Text {
                model.effective_max_size()
            } else {
                MAX_LINK_BYTES_AS_TEXT
            };
            if raw.chars().count() > limit {
                return Err(invalid(format!(
                    "text exceeds the maximum length of {limit} characters; \
                     consider a file reference for large payloads"
                )));
            }
            raw.to_string()
        }
        ColumnType::Integer | ColumnType::FileRef | ColumnType::Date => raw
            .parse::<i64>()
            .map(|v| v.to_string())
            .map_err(|e| invalid(e.to_string()))?,
        ColumnType::Double => raw
            .parse::<f64>()
            .map(|v| v.to_string())
            .map_err(|e| invalid(e.to_string()))?,
        ColumnType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" => "true".to_string(),
            "false" => "false".to_string(),
            other => return Err(invalid(format!("'{other}' is not a boolean"))),
        },
    };
    Ok(Some(canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_idempotent() {
        let a = ColumnModel::new("age", ColumnType::Integer);
        let b = ColumnModel::new("age", ColumnType::Integer);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_id_changes_with_definition() {
        let a = ColumnModel::new("age", ColumnType::Integer);
        let b = ColumnModel::new("age", ColumnType::Text);
        let c = ColumnModel::new("age", ColumnType::Integer).with_default("0");
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_validate_integer() {
        let model = ColumnModel::new("n", ColumnType::Integer);
        assert_eq!(
            validate_cell_value(Some("42"), &model, 0, 0).unwrap(),
            Some("42".to_string())
        );
        let err = validate_cell_value(Some("forty-two"), &model, 3, 1).unwrap_err();
        assert!(err.to_string().contains("[3,1]"), "{err}");
    }

    #[test]
    fn test_validate_boolean_canonicalizes() {
        let model = ColumnModel::new("flag", ColumnType::Boolean);
        assert_eq!(
            validate_cell_value(Some("TRUE"), &model, 0, 0).unwrap(),
            Some("true".to_string())
        );
        assert!(validate_cell_value(Some("yes"), &model, 0, 0).is_err());
    }

    #[test]
    fn test_validate_unset_applies_default() {
        let model = ColumnModel::new("city", ColumnType::Text).with_default("unknown");
        assert_eq!(
            validate_cell_value(None, &model, 0, 0).unwrap(),
            Some("unknown".to_string())
        );
        let no_default = ColumnModel::new("city", ColumnType::Text);
        assert_eq!(validate_cell_value(None, &no_default, 0, 0).unwrap(), None);
    }

    #[test]
    fn test_validate_text_length() {
        let model = ColumnModel::new("s", ColumnType::Text).with_max_size(3);
        assert!(validate_cell_value(Some("abc"), &model, 0, 0).is_ok());
        assert!(validate_cell_value(Some("abcd"), &model, 0, 0).is_err());
    }

    #[test]
    fn test_validate_enum_values() {
        let model = ColumnModel::new("color", ColumnType::Text)
            .with_enum_values(vec!["red".to_string(), "blue".to_string()]);
        assert!(validate_cell_value(Some("red"), &model, 0, 0).is_ok());
        assert!(validate_cell_value(Some("green"), &model, 0, 0).is_err());
    }

    #[test]
    fn test_max_bytes_as_text() {
        let text = ColumnModel::new("s", ColumnType::Text).with_max_size(10);
        assert_eq!(max_bytes_as_text(&text), 40);
        let int = ColumnModel::new("n", ColumnType::Integer);
        assert_eq!(max_bytes_as_text(&int), MAX_INTEGER_BYTES_AS_TEXT);
    }
}
