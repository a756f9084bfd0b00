use std::path::Path;

use mep_db::{Association, AssociationRegistry, SqlIdent};
use serde::Deserialize;

use super::{
    AssociationContextCollector, BlockContextCollector, ContextTagCollector, GarbageCollector,
};
use crate::GcError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockContextConfig {
    pub block_context: String,
    pub table: SqlIdent,
    pub column: SqlIdent,
}

/// Collector registration, read from the JSON file named by `MEP_GC_CONFIG`.
///
/// ```json
/// {
///   "associations": [{"owner": "Post", "field": "cover", "table": "posts", "column": "cover_id"}],
///   "context_tags": [],
///   "block_contexts": [{"block_context": "image_block", "table": "image_blocks", "column": "image_id"}]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub associations: Vec<Association>,
    pub context_tags: Vec<Association>,
    pub block_contexts: Vec<BlockContextConfig>,
}

impl GcConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, GcError> {
        serde_json::from_str(raw).map_err(|e| GcError::Config(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, GcError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GcError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Load `MEP_GC_CONFIG` if set; otherwise no collectors are registered.
    pub fn from_env() -> Result<Self, GcError> {
        match std::env::var("MEP_GC_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_path(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Collectors in run order: associations, context tags, then one per block context.
    pub fn collectors(&self) -> Result<Vec<Box<dyn GarbageCollector>>, GcError> {
        let mut collectors: Vec<Box<dyn GarbageCollector>> = Vec::new();
        if !self.associations.is_empty() {
            let registry = AssociationRegistry::try_from(self.associations.clone())?;
            collectors.push(Box::new(AssociationContextCollector::new(registry)));
        }
        if !self.context_tags.is_empty() {
            let registry = AssociationRegistry::try_from(self.context_tags.clone())?;
            collectors.push(Box::new(ContextTagCollector::new(registry)));
        }
        for block in &self.block_contexts {
            collectors.push(Box::new(BlockContextCollector::new(
                block.block_context.clone(),
                block.table.clone(),
                block.column.clone(),
            )));
        }
        Ok(collectors)
    }
}
