use thiserror::Error;

#[derive(Debug, Error)]
pub enum TutorError {
    #[error("learner not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid level curve: {0}")]
    InvalidCurve(String),

    #[error("turn {got} arrived after turn {last}")]
    OutOfOrder { last: u64, got: u64 },

    #[error("no turn can follow turn {0}")]
    SequenceExhausted(u64),
}

pub type TutorResult<T> = Result<T, TutorError>;
