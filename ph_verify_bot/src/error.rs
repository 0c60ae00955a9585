use teloxide::RequestError;
use thiserror::Error;

/// Anything that can go wrong while handling an update.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Telegram request failed: {0}")]
    Request(#[from] RequestError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
