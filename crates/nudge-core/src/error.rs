use thiserror::Error;

#[derive(Debug, Error)]
pub enum NudgeError {
    #[error("channel error: {0}")]
    Channel(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("llm error ({provider}): {message}")]
    Llm { provider: String, message: String },
    #[error("http error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("config error: {0}")]
    Config(String),
    #[error("scheduler error: {0}")]
    Scheduler(String),
    #[error("invalid activity: {0}")]
    InvalidActivity(String),
}

pub type Result<T> = std::result::Result<T, NudgeError>;
