//! Postgres table naming for per-source vector tables.

use std::collections::HashMap;

use crate::assigner::content_hash;
use crate::error::ConfigError;

/// Postgres truncates identifiers longer than this many bytes.
pub const MAX_IDENT_BYTES: usize = 63;

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self, ConfigError>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(invalid("schema", "schema name is required"));
        }
        if table.trim().is_empty() {
            return Err(invalid("table", "table name is required"));
        }
        for (name, value) in [("schema", &schema), ("table", &table)] {
            if value.len() > MAX_IDENT_BYTES {
                return Err(invalid(
                    name,
                    format!("`{value}` is longer than {MAX_IDENT_BYTES} bytes"),
                ));
            }
        }
        Ok(Self { schema, table })
    }

    /// Table for a source label: `{prefix}{label}` with the label reduced to
    /// lowercase identifier characters.
    pub fn for_source(schema: &str, prefix: &str, label: &str) -> Result<Self, ConfigError> {
        let suffix = sanitize_ident(&label.to_lowercase());
        if suffix.trim_matches('_').is_empty() {
            return Err(invalid("source", format!("label `{label}` has no usable characters")));
        }
        Self::new(schema, format!("{prefix}{suffix}"))
    }

    /// One table per label, in order.
    ///
    /// Fails when two labels reduce to the same table, e.g. `Wire` and `wire`.
    pub fn for_sources<'a, I>(
        schema: &str,
        prefix: &str,
        labels: I,
    ) -> Result<Vec<Self>, ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut owners: HashMap<String, &'a str> = HashMap::new();
        let mut tables = Vec::new();
        for label in labels {
            let table = Self::for_source(schema, prefix, label)?;
            if let Some(first) = owners.insert(table.qualified(), label) {
                return Err(ConfigError::TableCollision {
                    table: table.table,
                    first: first.to_string(),
                    second: label.to_string(),
                });
            }
            tables.push(table);
        }
        Ok(tables)
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Returns the raw schema string.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the HNSW cosine index on the embedding column.
    ///
    /// Long names are cut and suffixed with a hash of the full name so two
    /// tables never share an index name after truncation.
    pub fn embedding_index_name(&self) -> String {
        let full = format!(
            "{}_{}_embedding_idx",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table)
        );
        if full.len() <= MAX_IDENT_BYTES {
            return full;
        }
        let hash = content_hash(&full);
        format!("{}_{hash}", &full[..MAX_IDENT_BYTES - hash.len() - 1])
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

fn invalid(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn quotes_and_escapes_identifiers() {
        let table = TableName::new("public", "odd\"name").unwrap();
        assert_eq!(table.qualified(), "\"public\".\"odd\"\"name\"");
    }

    #[test]
    fn derives_table_from_source_label() {
        let table = TableName::for_source("public", "stock_news_", "Nvidia Q3.json").unwrap();
        assert_eq!(table.table(), "stock_news_nvidia_q3_json");
        assert_eq!(table.embedding_index_name(), "public_stock_news_nvidia_q3_json_embedding_idx");
    }

    #[test]
    fn rejects_empty_names() {
        assert!(TableName::new(" ", "t").is_err());
        assert!(TableName::new("public", "").is_err());
        assert!(TableName::for_source("public", "p_", "!!").is_err());
    }

    #[test]
    fn labels_differing_only_in_case_or_punctuation_collide() {
        for (first, second) in [("Wire", "wire"), ("wire-feed", "wire_feed")] {
            let err = TableName::for_sources("public", "stock_news_", [first, second]).unwrap_err();
            assert_eq!(
                err,
                ConfigError::TableCollision {
                    table: TableName::for_source("public", "stock_news_", first)
                        .unwrap()
                        .table()
                        .to_string(),
                    first: first.to_string(),
                    second: second.to_string(),
                }
            );
        }
    }

    #[test]
    fn distinct_labels_get_distinct_tables() {
        let tables = TableName::for_sources("public", "stock_news_", ["wire", "blogs"]).unwrap();
        let names: Vec<&str> = tables.iter().map(TableName::table).collect();
        assert_eq!(names, vec!["stock_news_wire", "stock_news_blogs"]);
    }

    #[test]
    fn labels_past_the_identifier_limit_are_rejected() {
        let label = "a".repeat(MAX_IDENT_BYTES);
        let err = TableName::for_source("public", "stock_news_", &label).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "table"));
        let longest = "a".repeat(MAX_IDENT_BYTES - "stock_news_".len());
        assert!(TableName::for_source("public", "stock_news_", &longest).is_ok());
    }

    #[test]
    fn long_index_names_stay_unique_within_the_limit() {
        let left = TableName::new("public", format!("{}_left", "x".repeat(50))).unwrap();
        let right = TableName::new("public", format!("{}_right", "x".repeat(50))).unwrap();
        let (left, right) = (left.embedding_index_name(), right.embedding_index_name());
        assert_eq!(left.len(), MAX_IDENT_BYTES);
        assert_eq!(right.len(), MAX_IDENT_BYTES);
        assert_ne!(left, right);
    }
}
