//! Resolver host error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("unsupported capability type: {0}")]
    UnknownCapability(String),

    #[error("object {object_id} is already registered as {existing}")]
    CapabilityConflict { object_id: String, existing: String },

    #[error("unknown script object: {0}")]
    UnknownObject(String),

    #[error("malformed script message: {0}")]
    MalformedMessage(String),

    #[error("unknown native method: {0}")]
    UnknownNativeMethod(String),

    #[error("invalid parameters for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("account unloaded: {0}")]
    Unloaded(String),

    #[error("job {0} was abandoned before a result arrived")]
    JobAbandoned(String),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("config store error: {0}")]
    ConfigStore(String),

    #[error("collection error: {0}")]
    Collection(#[from] tempo_collection::CollectionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ResolverError {
    fn from(e: reqwest::Error) -> Self {
        ResolverError::Http(e.to_string())
    }
}
