//! Reserved-namespace validation for plugin, topic and task names.
//!
//! Every identifier a plugin hands to the runtime is a dotted name whose
//! first segment is the platform's reserved root, e.g. `ns.billing.recon`.

use std::fmt;

use crate::error::AppError;

/// What kind of identifier is being validated. Only used for error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// A plugin name from a manifest.
    Plugin,
    /// An event bus topic.
    Topic,
    /// A cron task name.
    Task,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plugin => write!(f, "plugin name"),
            Self::Topic => write!(f, "topic"),
            Self::Task => write!(f, "task name"),
        }
    }
}

/// Checks a dotted identifier for well-formed segments, ignoring the root.
pub fn validate_dotted(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("identifier is empty".to_string());
    }
    for segment in name.split('.') {
        if segment.is_empty() {
            return Err(format!("'{name}' has an empty segment"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(format!(
                "segment '{segment}' of '{name}' may only contain a-z, 0-9, '_' and '-'"
            ));
        }
    }
    Ok(())
}

/// The reserved root namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRoot(String);

impl NamespaceRoot {
    /// Create a root namespace. The root itself must be a single segment.
    pub fn new(root: impl Into<String>) -> Result<Self, AppError> {
        let root = root.into();
        if root.contains('.') {
            return Err(AppError::configuration(format!(
                "namespace root '{root}' must be a single segment"
            )));
        }
        validate_dotted(&root).map_err(AppError::configuration)?;
        Ok(Self(root))
    }

    /// The root segment.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates `name` lives under the root and is well formed.
    ///
    /// The error names the offending identifier.
    pub fn validate(&self, kind: IdentifierKind, name: &str) -> Result<(), AppError> {
        let under_root = name
            .strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|rest| !rest.is_empty());

        if !under_root {
            return Err(AppError::validation(format!(
                "{kind} '{name}' must start with the reserved namespace '{}.'",
                self.0
            )));
        }

        validate_dotted(name)
            .map_err(|reason| AppError::validation(format!("invalid {kind}: {reason}")))
    }

    /// Builds a name under the root from the given segments.
    pub fn join(&self, segments: &[&str]) -> String {
        let mut name = self.0.clone();
        for segment in segments {
            name.push('.');
            name.push_str(segment);
        }
        name
    }
}

impl fmt::Display for NamespaceRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
