use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScoutError {
    /// Short error code string, logged by the CLI next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            ScoutError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
