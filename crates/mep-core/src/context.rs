use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// Owner tag stored under the `context` metadata key.
///
/// Formatted as `<Owner>::$<field>` with an optional `#<subContext>` suffix,
/// e.g. `App\Entity\Page::$blocks#image-3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Context {
    owner: String,
    field: String,
    sub_context: Option<String>,
}

impl Context {
    pub fn new(owner: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            field: field.into(),
            sub_context: None,
        }
    }

    pub fn with_sub_context(mut self, sub_context: impl Into<String>) -> Self {
        self.sub_context = Some(sub_context.into());
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn sub_context(&self) -> Option<&str> {
        self.sub_context.as_deref()
    }

    /// The `<Owner>::$<field>` part, without any sub-context.
    pub fn association_tag(&self) -> String {
        format!("{}::${}", self.owner, self.field)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::${}", self.owner, self.field)?;
        if let Some(sub) = &self.sub_context {
            write!(f, "#{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for Context {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ContextError::Malformed(s.to_string());
        let (owner, rest) = s.split_once("::$").ok_or_else(malformed)?;
        let (field, sub_context) = match rest.split_once('#') {
            Some((field, sub)) => (field, Some(sub)),
            None => (rest, None),
        };
        if owner.is_empty() || field.is_empty() || sub_context == Some("") {
            return Err(malformed());
        }
        Ok(Self {
            owner: owner.to_string(),
            field: field.to_string(),
            sub_context: sub_context.map(str::to_string),
        })
    }
}

impl TryFrom<String> for Context {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Context> for String {
    fn from(context: Context) -> Self {
        context.to_string()
    }
}
