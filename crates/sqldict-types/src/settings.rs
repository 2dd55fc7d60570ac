//! The map configuration model.
//!
//! A *map* binds a path pattern to a SQL table: which columns the `$`
//! wildcards bind to, which column(s) hold the value, and the optional
//! username and expiry columns. The configuration is loaded by the host
//! (any `serde` format works); this module owns the model and its
//! structural validation.

use serde::{Deserialize, Serialize};
use sqldict_error::{DictError, Result};

use crate::value::SqlValueType;

/// A named SQL column with its declared value kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlField {
    /// SQL column name.
    pub name: String,
    /// Value kind of the column; defaults to `string`.
    #[serde(default)]
    pub value_type: SqlValueType,
}

impl SqlField {
    /// A string-typed field.
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: SqlValueType::String,
        }
    }

    /// A field with an explicit value kind.
    pub fn typed(name: impl Into<String>, value_type: SqlValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// One pattern-to-table binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictMap {
    /// Path pattern with `$` as the single-segment wildcard,
    /// e.g. `shared/quota/$/$/limit`.
    pub pattern: String,
    /// SQL table name (the driver's table prefix is prepended at query time).
    pub table: String,
    /// Columns bound by the pattern wildcards, in wildcard order.
    #[serde(default)]
    pub pattern_fields: Vec<SqlField>,
    /// Result columns; position 0 is the primary value written by
    /// `set`/`inc`, the rest are projected on read only.
    pub value_fields: Vec<SqlField>,
    /// Column holding the per-operation username for `priv/` paths.
    #[serde(default)]
    pub username_field: Option<String>,
    /// Integer-seconds epoch column; a row is invisible once it has passed.
    #[serde(default)]
    pub expire_field: Option<String>,
}

impl DictMap {
    /// Number of `$` wildcards in the pattern.
    pub fn wildcard_count(&self) -> usize {
        self.pattern.bytes().filter(|&b| b == b'$').count()
    }

    /// Comma-joined value column names, in declaration order.
    pub fn value_projection(&self) -> String {
        let names: Vec<&str> = self.value_fields.iter().map(|f| f.name.as_str()).collect();
        names.join(",")
    }

    /// The primary value column, used by `set` and `atomic_inc`.
    pub fn primary_value_field(&self) -> &SqlField {
        &self.value_fields[0]
    }

    /// Structural validation of one map.
    fn validate(&self) -> Result<()> {
        if self.pattern.is_empty() {
            return Err(DictError::config("map pattern is empty"));
        }
        if self.table.is_empty() {
            return Err(DictError::config(format!(
                "map {} has no table",
                self.pattern
            )));
        }
        if self.value_fields.is_empty() {
            return Err(DictError::config(format!(
                "map {} has no value fields",
                self.pattern
            )));
        }
        let wildcards = self.wildcard_count();
        if wildcards != self.pattern_fields.len() {
            return Err(DictError::config(format!(
                "map {} declares {} pattern fields for {} wildcards",
                self.pattern,
                self.pattern_fields.len(),
                wildcards
            )));
        }
        for field in self.pattern_fields.iter().chain(self.value_fields.iter()) {
            if field.name.is_empty() {
                return Err(DictError::config(format!(
                    "map {} has a field with an empty column name",
                    self.pattern
                )));
            }
        }
        Ok(())
    }
}

/// The full dictionary configuration: connect string plus map list.
///
/// Map declaration order is significant; the first matching map wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictSettings {
    /// Driver connect string, passed through to the SQL backend.
    pub connect: String,
    /// Pattern maps in priority order.
    pub maps: Vec<DictMap>,
}

impl DictSettings {
    /// Parse settings from a JSON document and validate them.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| DictError::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every map.
    pub fn validate(&self) -> Result<()> {
        if self.maps.is_empty() {
            return Err(DictError::config("no maps configured"));
        }
        for map in &self.maps {
            map.validate()?;
        }
        Ok(())
    }

    /// The largest pattern-field count across all maps. Used to size the
    /// bound-value scratch during matching.
    pub fn max_pattern_fields(&self) -> usize {
        self.maps
            .iter()
            .map(|m| m.pattern_fields.len())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota_map() -> DictMap {
        DictMap {
            pattern: "shared/q/$/lim".to_owned(),
            table: "Q".to_owned(),
            pattern_fields: vec![SqlField::string("u")],
            value_fields: vec![SqlField::typed("v", SqlValueType::Int)],
            username_field: None,
            expire_field: None,
        }
    }

    #[test]
    fn valid_map_passes() {
        let settings = DictSettings {
            connect: "host=db".to_owned(),
            maps: vec![quota_map()],
        };
        settings.validate().expect("valid settings");
        assert_eq!(settings.max_pattern_fields(), 1);
    }

    #[test]
    fn wildcard_field_mismatch_rejected() {
        let mut map = quota_map();
        map.pattern_fields.clear();
        let settings = DictSettings {
            connect: String::new(),
            maps: vec![map],
        };
        let err = settings.validate().expect_err("mismatch must fail");
        assert!(err.to_string().contains("pattern fields"));
    }

    #[test]
    fn empty_value_fields_rejected() {
        let mut map = quota_map();
        map.value_fields.clear();
        assert!(map.validate().is_err());
    }

    #[test]
    fn value_projection_joins_columns() {
        let mut map = quota_map();
        map.value_fields.push(SqlField::string("extra"));
        assert_eq!(map.value_projection(), "v,extra");
        assert_eq!(map.primary_value_field().name, "v");
    }

    #[test]
    fn from_json() {
        let settings = DictSettings::from_json_str(
            r#"{
                "connect": "host=localhost dbname=dicts",
                "maps": [{
                    "pattern": "priv/quota/$",
                    "table": "quota",
                    "pattern_fields": [{"name": "box", "value_type": "string"}],
                    "value_fields": [{"name": "bytes", "value_type": "uint"}],
                    "username_field": "username"
                }]
            }"#,
        )
        .expect("json settings should parse");
        assert_eq!(settings.maps.len(), 1);
        assert_eq!(
            settings.maps[0].value_fields[0].value_type,
            SqlValueType::Uint
        );
        assert_eq!(
            settings.maps[0].username_field.as_deref(),
            Some("username")
        );
    }

    #[test]
    fn from_json_rejects_invalid() {
        let err = DictSettings::from_json_str(r#"{"connect": "x", "maps": []}"#)
            .expect_err("empty maps must fail");
        assert!(matches!(err, DictError::Config(_)));
    }
}
