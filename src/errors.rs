//! Typed error hierarchy for the task board.
//!
//! Four top-level enums cover the four subsystems:
//! - `StoreError`: remote/local document store failures
//! - `SyncError`: synchronization cache failures (read at init, write after retries)
//! - `BoardError`: task intents rejected by the board view model
//! - `WebhookError`: webhook ingress failures (signature, payload)

use thiserror::Error;

/// Errors from a single store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store '{store}' is not reachable: {message}")]
    NotReachable { store: String, message: String },

    #[error("Store I/O failed at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode or decode document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Injected failure: {0}")]
    Injected(String),
}

/// Errors surfaced by the synchronization cache.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to read board from remote store: {0}")]
    RemoteRead(#[source] StoreError),

    #[error("Failed to write board after {attempts} attempts: {source}")]
    RemoteWrite {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Synchronization cache has not been initialized")]
    NotInitialized,

    #[error("Background write task failed: {0}")]
    WriteTaskFailed(String),
}

/// Errors from board intents (create/update/delete/move).
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("Task title must not be empty")]
    EmptyTitle,

    #[error("No drag gesture in progress")]
    NoActiveDrag,

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors from the webhook receivers.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid signature")]
    SignatureValidation,

    #[error("Webhook secret not configured")]
    SecretNotConfigured,

    #[error("{0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_io_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/board/iris-kanban-tasks.json");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StoreError::Io {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            StoreError::Io { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io variant"),
        }
        assert!(err.to_string().contains("iris-kanban-tasks.json"));
    }

    #[test]
    fn sync_error_remote_write_carries_attempts() {
        let err = SyncError::RemoteWrite {
            attempts: 3,
            source: StoreError::Injected("offline".into()),
        };
        match &err {
            SyncError::RemoteWrite { attempts, .. } => assert_eq!(*attempts, 3),
            _ => panic!("Expected RemoteWrite"),
        }
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn board_error_converts_from_sync_error() {
        let err: BoardError = SyncError::NotInitialized.into();
        assert!(matches!(err, BoardError::Sync(SyncError::NotInitialized)));
    }

    #[test]
    fn webhook_error_messages_match_http_bodies() {
        assert_eq!(WebhookError::SignatureValidation.to_string(), "Invalid signature");
        assert_eq!(
            WebhookError::MalformedPayload("Invalid JSON".into()).to_string(),
            "Invalid JSON"
        );
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::LockPoisoned);
        assert_std_error(&SyncError::NotInitialized);
        assert_std_error(&BoardError::EmptyTitle);
        assert_std_error(&WebhookError::SecretNotConfigured);
    }
}
