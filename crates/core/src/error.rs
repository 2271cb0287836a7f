use thiserror::Error;

pub type FunnelResult<T> = Result<T, FunnelError>;

#[derive(Error, Debug)]
pub enum FunnelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Contact lock timed out for {0}")]
    LockTimeout(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Malformed inbound event: {0}")]
    MalformedInbound(String),

    #[error("Funnel {funnel_id} already sent to contact {contact_key}")]
    DuplicateFunnel {
        contact_key: String,
        funnel_id: String,
    },

    #[error("Unknown contact: {0}")]
    UnknownContact(String),

    #[error("Unknown funnel: {0}")]
    UnknownFunnel(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
