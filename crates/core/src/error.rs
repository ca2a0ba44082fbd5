/// Result alias that carries the custom [`KeylightError`] type.
pub type Result<T> = std::result::Result<T, KeylightError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum KeylightError {
    /// Free-form message for failures that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration could not be parsed from JSON.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Configuration parsed but is not usable. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A second tracker tried to bind an endpoint that is already claimed.
    #[error("an input is already bound to endpoint `{0}`")]
    EndpointInUse(String),
    /// Shared engine state was poisoned by a panicking thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// The pixel sink rejected a frame.
    #[error("pixel sink failed: {0}")]
    Sink(String),
}

impl KeylightError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}

impl From<&str> for KeylightError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for KeylightError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
