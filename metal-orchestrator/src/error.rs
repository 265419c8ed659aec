use metal_providers::ApiError;

/// Failure taxonomy of the reconciliation core.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Malformed or missing input. Never retried.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Upstream {
        context: String,
        #[source]
        source: ApiError,
    },

    /// Device reached a state it cannot recover from while being awaited.
    #[error("{0}")]
    PollFatal(String),

    #[error("attempt count exceeded ({attempts}): {last_error}")]
    PollExhausted { attempts: u32, last_error: String },

    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<ReconcileError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("delete task failed: {0}")]
    Task(String),
}

impl ReconcileError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ReconcileError::Validation(msg.into())
    }

    pub fn upstream(context: impl Into<String>, source: ApiError) -> Self {
        ReconcileError::Upstream {
            context: context.into(),
            source,
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        ReconcileError::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Proximate cause, with every layer of operation context stripped.
    pub fn root(&self) -> &ReconcileError {
        let mut err = self;
        while let ReconcileError::Wrapped { source, .. } = err {
            err = source;
        }
        err
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), ReconcileError::Validation(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), ReconcileError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_render_the_whole_chain() {
        let err = ReconcileError::PollFatal("device failed".to_string())
            .context("failed to wait for instance to become active")
            .context("failed to wait for device");
        assert_eq!(
            err.to_string(),
            "failed to wait for device: failed to wait for instance to become active: device failed"
        );
        assert!(matches!(err.root(), ReconcileError::PollFatal(_)));
        assert!(!err.is_validation());
    }

    #[test]
    fn upstream_keeps_status() {
        let err = ReconcileError::upstream(
            "failed to delete device",
            ApiError::Status {
                status: 500,
                body: "boom".to_string(),
            },
        );
        assert_eq!(err.to_string(), "failed to delete device: status=500 body=boom");
        match err.root() {
            ReconcileError::Upstream { source, .. } => assert_eq!(source.status_code(), Some(500)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
