use friday_storage::StorageError;

/// Failures a command handler cannot turn into a reply on its own. The
/// dispatcher clears the session and answers with a generic retry message.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("session belongs to {found}, not {expected}")]
    SessionMismatch { expected: String, found: String },
    #[error("{command} has no step {step}")]
    UnexpectedStep { command: String, step: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
