use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("Device protocol error: HTTP {status}: {message}")]
    DeviceProtocol { status: u16, message: String },

    #[error("Malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

