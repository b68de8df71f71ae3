use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("DB error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Forward error: {0}")]
    Forward(#[from] reqwest::Error),
    #[error("Time parse error: {0}")]
    Time(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<tokio_serial::Error> for AppError {
    fn from(e: tokio_serial::Error) -> Self {
        AppError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
