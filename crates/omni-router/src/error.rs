use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no handler registered for channel: {0}")]
    NoHandler(String),
    #[error("rate limited")]
    RateLimited,
    #[error("dead letter index out of range: {0}")]
    DeadLetterIndexOutOfRange(usize),
}
