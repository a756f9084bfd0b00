use crate::{Association, SqlIdent};

/// How a scan narrows attachments down to one owner's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextFilter {
    /// Exact match on the indexed `context` column.
    Column(String),
    /// Exact match on `context` extracted from the metadata JSON at query time.
    JsonPath(String),
    /// Context contains `#<subContext>`, whatever the per-block suffix.
    SubContext(String),
}

impl ContextFilter {
    /// The value bound to the query's first parameter.
    pub(crate) fn bind_value(&self) -> String {
        match self {
            ContextFilter::Column(tag) | ContextFilter::JsonPath(tag) => tag.clone(),
            ContextFilter::SubContext(sub) => format!("#{sub}"),
        }
    }
}

/// Attachments with no row in `table` whose `column` points at them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanQuery {
    pub table: SqlIdent,
    pub column: SqlIdent,
    pub context: ContextFilter,
}

impl OrphanQuery {
    pub fn for_association(association: &Association, json_path: bool) -> Self {
        let tag = association.context().to_string();
        Self {
            table: association.table.clone(),
            column: association.column.clone(),
            context: if json_path {
                ContextFilter::JsonPath(tag)
            } else {
                ContextFilter::Column(tag)
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    #[cfg(feature = "sqlite")]
    Sqlite,
    #[cfg(feature = "postgres")]
    Postgres,
}

impl Dialect {
    fn param(self, n: usize) -> String {
        match self {
            #[cfg(feature = "sqlite")]
            Dialect::Sqlite => format!("?{n}"),
            #[cfg(feature = "postgres")]
            Dialect::Postgres => format!("${n}"),
        }
    }

    /// Text value of a top-level key in the `metadata` JSON column.
    fn json_text(self, column: &str, key: &str) -> String {
        match self {
            #[cfg(feature = "sqlite")]
            Dialect::Sqlite => format!("json_extract({column}, '$.{key}')"),
            #[cfg(feature = "postgres")]
            Dialect::Postgres => format!("({column}::jsonb ->> '{key}')"),
        }
    }

    /// Case-sensitive substring test, matching the same rows on both dialects.
    fn contains(self, column: &str, needle: &str) -> String {
        match self {
            #[cfg(feature = "sqlite")]
            Dialect::Sqlite => format!("instr({column}, {needle}) > 0"),
            #[cfg(feature = "postgres")]
            Dialect::Postgres => format!("strpos({column}, {needle}) > 0"),
        }
    }
}

/// `SELECT` for one page of orphans. Parameters: context value, cursor, limit.
pub(crate) fn orphan_sql(query: &OrphanQuery, dialect: Dialect) -> String {
    let owner_key = format!("o.{}", query.column.quoted());
    let context_clause = match &query.context {
        ContextFilter::Column(_) => format!("a.context = {}", dialect.param(1)),
        ContextFilter::JsonPath(_) => format!(
            "{} = {}",
            dialect.json_text("a.metadata", mep_core::metadata::CONTEXT_KEY),
            dialect.param(1)
        ),
        ContextFilter::SubContext(_) => dialect.contains("a.context", &dialect.param(1)),
    };
    format!(
        "SELECT a.id, a.file_name, a.mime_type, a.file_size, a.metadata, a.created_at
         FROM attachments a
         LEFT JOIN {table} o ON {owner_key} = a.id
         WHERE {owner_key} IS NULL
           AND {context_clause}
           AND a.id > {cursor}
         ORDER BY a.id
         LIMIT {limit}",
        table = query.table.quoted(),
        cursor = dialect.param(2),
        limit = dialect.param(3),
    )
}
