use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown provider '{0}' in model string")]
    UnknownProvider(String),
}
