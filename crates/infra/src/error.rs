use thiserror::Error;

use courier_core::DomainError;

use crate::store::StoreError;

/// Pipeline operation error.
///
/// Per-document delivery and handler failures are not errors at this level: they
/// are recorded on the document and reported as outcomes. What surfaces here is
/// either the caller's fault (`Validation`, `NotFound`) or fatal for a sweep.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("email provider is not configured")]
    MailerUnconfigured,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        PipelineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Errors that abort a sweep phase. A store error about a single document
    /// only costs that document its turn.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::MailerUnconfigured => true,
            PipelineError::Store(err) => !err.is_document_scoped(),
            PipelineError::Validation(_) | PipelineError::NotFound { .. } => false,
        }
    }
}

impl From<DomainError> for PipelineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                PipelineError::Validation(msg)
            }
            other => PipelineError::Validation(other.to_string()),
        }
    }
}
