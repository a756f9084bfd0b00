use mep_core::Context;
use serde::{Deserialize, Serialize};

use crate::{DbError, SqlIdent};

/// A nullable foreign key from an owner table to `attachments.id`.
///
/// `owner` and `field` name the owning type and property as they appear in
/// the attachment's `context` tag; `table` and `column` locate the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub owner: String,
    pub field: String,
    pub table: SqlIdent,
    pub column: SqlIdent,
}

impl Association {
    pub fn new(
        owner: impl Into<String>,
        field: impl Into<String>,
        table: &str,
        column: &str,
    ) -> Result<Self, DbError> {
        Ok(Self {
            owner: owner.into(),
            field: field.into(),
            table: SqlIdent::new(table)?,
            column: SqlIdent::new(column)?,
        })
    }

    pub fn context(&self) -> Context {
        Context::new(&self.owner, &self.field)
    }
}

/// Every owner association that points at attachments, registered at startup.
#[derive(Debug, Clone, Default)]
pub struct AssociationRegistry {
    associations: Vec<Association>,
}

impl AssociationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an association. Registering the same owner field or the same
    /// table column twice is an error.
    pub fn register(&mut self, association: Association) -> Result<&mut Self, DbError> {
        let duplicate = self.associations.iter().any(|a| {
            (a.owner == association.owner && a.field == association.field)
                || (a.table == association.table && a.column == association.column)
        });
        if duplicate {
            return Err(DbError::InvalidInput(format!(
                "association {} ({}.{}) registered twice",
                association.context(),
                association.table,
                association.column
            )));
        }
        self.associations.push(association);
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Association> {
        self.associations.iter()
    }

    pub fn len(&self) -> usize {
        self.associations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }
}

impl TryFrom<Vec<Association>> for AssociationRegistry {
    type Error = DbError;

    fn try_from(associations: Vec<Association>) -> Result<Self, Self::Error> {
        let mut registry = Self::new();
        for association in associations {
            registry.register(association)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_keeps_order_and_builds_context() {
        let mut registry = AssociationRegistry::new();
        registry
            .register(Association::new("App\\Entity\\Post", "cover", "posts", "cover_id").unwrap())
            .unwrap()
            .register(Association::new("App\\Entity\\Post", "thumbnail", "posts", "thumbnail_id").unwrap())
            .unwrap();

        let contexts: Vec<String> = registry.iter().map(|a| a.context().to_string()).collect();
        assert_eq!(
            contexts,
            vec!["App\\Entity\\Post::$cover", "App\\Entity\\Post::$thumbnail"]
        );
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = AssociationRegistry::new();
        registry
            .register(Association::new("Post", "cover", "posts", "cover_id").unwrap())
            .unwrap();
        assert!(registry
            .register(Association::new("Post", "cover", "articles", "image_id").unwrap())
            .is_err());
        assert!(registry
            .register(Association::new("Article", "image", "posts", "cover_id").unwrap())
            .is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deserialize_validates_identifiers() {
        let ok: Vec<Association> = serde_json::from_str(
            r#"[{"owner":"Post","field":"cover","table":"posts","column":"cover_id"}]"#,
        )
        .unwrap();
        assert_eq!(AssociationRegistry::try_from(ok).unwrap().len(), 1);

        let bad = serde_json::from_str::<Vec<Association>>(
            r#"[{"owner":"Post","field":"cover","table":"posts; --","column":"cover_id"}]"#,
        );
        assert!(bad.is_err());
    }
}
