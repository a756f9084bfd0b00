use regex::Regex;
use serde::Serialize;

/// One failed upload check, reported to the client as `{property, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub property: String,
    pub message: String,
}

impl Violation {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
        }
    }
}

/// Form-level checks applied to an upload before it reaches the store pipeline.
#[derive(Debug, Clone, Default)]
pub struct FileConstraints {
    /// Maximum size in bytes.
    pub max_size: Option<u64>,
    /// Accepted MIME types; `image/*` style wildcards allowed. Empty accepts all.
    pub mime_types: Vec<String>,
    /// Pattern the client file name must match.
    pub name_pattern: Option<Regex>,
}

impl FileConstraints {
    pub fn validate(&self, property: &str, file_name: &str, mime_type: &str, size: u64) -> Vec<Violation> {
        let mut violations = Vec::new();

        if let Some(max) = self.max_size {
            if size > max {
                violations.push(Violation::new(
                    property,
                    format!("The file is too large ({size} bytes). Allowed maximum size is {max} bytes."),
                ));
            }
        }

        if !self.mime_types.is_empty() && !self.mime_types.iter().any(|m| mime_matches(m, mime_type)) {
            violations.push(Violation::new(
                property,
                format!(
                    "The mime type of the file is invalid (\"{mime_type}\"). Allowed mime types are {}.",
                    self.mime_types.join(", ")
                ),
            ));
        }

        if let Some(pattern) = &self.name_pattern {
            if !pattern.is_match(file_name) {
                violations.push(Violation::new(
                    property,
                    format!("The file name \"{file_name}\" is not valid."),
                ));
            }
        }

        violations
    }
}

fn mime_matches(allowed: &str, actual: &str) -> bool {
    match allowed.strip_suffix("/*") {
        Some(family) => actual
            .split_once('/')
            .is_some_and(|(f, _)| f.eq_ignore_ascii_case(family)),
        None => allowed.eq_ignore_ascii_case(actual),
    }
}
