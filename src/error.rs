use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the merge core. Nothing here is retried; callers
/// decide how to report them.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("column {column:?} not found in dataset")]
    MissingColumn { column: String },

    #[error("cannot access template {}: {reason}", path.display())]
    TemplateAccess { path: PathBuf, reason: String },

    #[error("template path must be absolute on this platform (got {})", path.display())]
    PathRequirement { path: PathBuf },
}

impl MergeError {
    pub fn missing_column(column: &str) -> Self {
        MergeError::MissingColumn {
            column: column.to_string(),
        }
    }

    pub fn template_access(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MergeError::TemplateAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
