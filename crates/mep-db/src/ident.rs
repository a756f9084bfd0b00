use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DbError;

/// A table or column name that is safe to splice into SQL.
///
/// Owner tables are only known at registration time, so they cannot be bound
/// as parameters; instead every name is checked here once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SqlIdent(String);

impl SqlIdent {
    pub fn new(name: impl Into<String>) -> Result<Self, DbError> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start
            || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            || name.len() > 63
        {
            return Err(DbError::InvalidInput(format!("invalid sql identifier {name:?}")));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form, valid in both SQLite and Postgres.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for SqlIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SqlIdent {
    type Error = DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SqlIdent> for String {
    fn from(ident: SqlIdent) -> Self {
        ident.0
    }
}
