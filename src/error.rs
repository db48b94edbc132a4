use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KdcError>;

/// Unified error type for the Keymaster KDC daemon
#[derive(Debug, Clone, Error)]
pub enum KdcError {
    // IO errors
    #[error("IO error: {0}")]
    Io(String),
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    // Configuration errors
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid record type code: {0}")]
    InvalidRecordTypeCode(u16),
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
    #[error("Configuration parse error: {0}")]
    ConfigParseError(String),

    // Lookup errors
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Service not found: {0}")]
    ServiceNotFound(String),
    #[error("Component not found: {0}")]
    ComponentNotFound(String),
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("Distribution not found: {0}")]
    DistributionNotFound(String),

    // Uniqueness violations
    #[error("Duplicate node public key: {0}")]
    DuplicateNodeKey(String),
    #[error("Service already has a signing component: {0}")]
    DuplicateSigningComponent(String),
    #[error("Conflict: {0}")]
    Conflict(String),

    // State machine errors
    #[error("Illegal key state transition: {0} -> {1}")]
    IllegalTransition(String, String),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    // Validation errors
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid public key length: {0} bytes")]
    InvalidPublicKeyLength(usize),
    #[error("Unknown key state: {0}")]
    UnknownKeyState(String),
    #[error("Unparseable query name: {0}")]
    UnparseableQname(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Storage busy: {0}")]
    StorageBusy(String),

    // Crypto errors
    #[error("Invalid recipient key length: {0} bytes")]
    InvalidRecipientKey(usize),
    #[error("KEM failure: {0}")]
    KemFailure(String),
    #[error("AEAD failure: {0}")]
    AeadFailure(String),
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    // Network errors
    #[error("NOTIFY send failed: {0}")]
    NotifySend(String),
    #[error("DNS exchange timed out")]
    Timeout,

    // Record codec errors
    #[error("Record parse error: {0}")]
    RecordParse(String),

    // Server state errors
    #[error("Server is shutting down")]
    ServerShutdown,
}

impl KdcError {
    /// True when the error is a lookup miss rather than a hard failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KdcError::ZoneNotFound(_)
                | KdcError::NodeNotFound(_)
                | KdcError::ServiceNotFound(_)
                | KdcError::ComponentNotFound(_)
                | KdcError::KeyNotFound(_)
                | KdcError::DistributionNotFound(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            KdcError::DuplicateNodeKey(_)
                | KdcError::DuplicateSigningComponent(_)
                | KdcError::Conflict(_)
        )
    }
}

impl From<std::io::Error> for KdcError {
    fn from(err: std::io::Error) -> Self {
        KdcError::IoError(Arc::new(err))
    }
}

impl From<sqlx::Error> for KdcError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => KdcError::Storage("row not found".to_string()),
            sqlx::Error::Database(db) => {
                let msg = db.message().to_string();
                if msg.contains("locked") || msg.contains("busy") {
                    KdcError::StorageBusy(msg)
                } else {
                    KdcError::Storage(msg)
                }
            }
            _ => KdcError::Storage(err.to_string()),
        }
    }
}

impl From<crate::dns::ParseError> for KdcError {
    fn from(err: crate::dns::ParseError) -> Self {
        KdcError::RecordParse(err.to_string())
    }
}

impl From<serde_json::Error> for KdcError {
    fn from(err: serde_json::Error) -> Self {
        KdcError::RecordParse(format!("JSON error: {}", err))
    }
}
