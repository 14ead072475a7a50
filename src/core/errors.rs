// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::{ParseFloatError, ParseIntError};
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all failures within the server.
/// `thiserror` gives us the `Display` impls that double as RESP error text.
#[derive(Error, Debug)]
pub enum OpalDBError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR wrong argument count for '{0}'")]
    WrongArgumentCount(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("NOAUTH Authentication required")]
    AuthRequired,

    #[error("ERR invalid password")]
    InvalidPassword,

    #[error("ERR invalid DB index")]
    InvalidDbIndex,

    #[error("ERR DB index out of bounds")]
    DbIndexOutOfBounds,

    #[error("ERR command '{0}' cannot be used in MULTI")]
    NotAllowedInMulti(String),

    #[error("EXECABORT Transaction discarded because of previous errors")]
    ExecAborted,

    #[error("READONLY You cannot write against a read only slave")]
    ReadOnlyReplica,

    #[error("ERR MULTI commands transaction must within one slot in cluster mode")]
    CrossSlotTransaction,

    #[error("ERR unknown command '{0}', or not supported in cluster mode")]
    UnknownClusterCommand(String),

    #[error("Persistence Error: {0}")]
    AofError(String),

    #[error("Replication Error: {0}")]
    ReplicationError(String),

    #[error("Cluster Error: {0}")]
    ClusterError(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual Clone because `std::io::Error` is not cloneable; the Arc makes the
// variant cheap to share between the writer task and its caller.
impl Clone for OpalDBError {
    fn clone(&self) -> Self {
        match self {
            OpalDBError::Io(e) => OpalDBError::Io(Arc::clone(e)),
            OpalDBError::IncompleteData => OpalDBError::IncompleteData,
            OpalDBError::ProtocolError(s) => OpalDBError::ProtocolError(s.clone()),
            OpalDBError::UnknownCommand(s) => OpalDBError::UnknownCommand(s.clone()),
            OpalDBError::SyntaxError => OpalDBError::SyntaxError,
            OpalDBError::WrongArgumentCount(s) => OpalDBError::WrongArgumentCount(s.clone()),
            OpalDBError::WrongType => OpalDBError::WrongType,
            OpalDBError::NotAnInteger => OpalDBError::NotAnInteger,
            OpalDBError::NotAFloat => OpalDBError::NotAFloat,
            OpalDBError::Overflow => OpalDBError::Overflow,
            OpalDBError::AuthRequired => OpalDBError::AuthRequired,
            OpalDBError::InvalidPassword => OpalDBError::InvalidPassword,
            OpalDBError::InvalidDbIndex => OpalDBError::InvalidDbIndex,
            OpalDBError::DbIndexOutOfBounds => OpalDBError::DbIndexOutOfBounds,
            OpalDBError::NotAllowedInMulti(s) => OpalDBError::NotAllowedInMulti(s.clone()),
            OpalDBError::ExecAborted => OpalDBError::ExecAborted,
            OpalDBError::ReadOnlyReplica => OpalDBError::ReadOnlyReplica,
            OpalDBError::CrossSlotTransaction => OpalDBError::CrossSlotTransaction,
            OpalDBError::UnknownClusterCommand(s) => OpalDBError::UnknownClusterCommand(s.clone()),
            OpalDBError::AofError(s) => OpalDBError::AofError(s.clone()),
            OpalDBError::ReplicationError(s) => OpalDBError::ReplicationError(s.clone()),
            OpalDBError::ClusterError(s) => OpalDBError::ClusterError(s.clone()),
            OpalDBError::Internal(s) => OpalDBError::Internal(s.clone()),
        }
    }
}

impl PartialEq for OpalDBError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OpalDBError::Io(e1), OpalDBError::Io(e2)) => e1.to_string() == e2.to_string(),
            (OpalDBError::ProtocolError(s1), OpalDBError::ProtocolError(s2)) => s1 == s2,
            (OpalDBError::UnknownCommand(s1), OpalDBError::UnknownCommand(s2)) => s1 == s2,
            (OpalDBError::WrongArgumentCount(s1), OpalDBError::WrongArgumentCount(s2)) => s1 == s2,
            (OpalDBError::NotAllowedInMulti(s1), OpalDBError::NotAllowedInMulti(s2)) => s1 == s2,
            (OpalDBError::UnknownClusterCommand(s1), OpalDBError::UnknownClusterCommand(s2)) => {
                s1 == s2
            }
            (OpalDBError::AofError(s1), OpalDBError::AofError(s2)) => s1 == s2,
            (OpalDBError::ReplicationError(s1), OpalDBError::ReplicationError(s2)) => s1 == s2,
            (OpalDBError::ClusterError(s1), OpalDBError::ClusterError(s2)) => s1 == s2,
            (OpalDBError::Internal(s1), OpalDBError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl OpalDBError {
    /// Renders the error the way it should appear on the wire, without the
    /// leading `-` marker. Variants whose `Display` already starts with a
    /// RESP error class (ERR, NOAUTH, WRONGTYPE, ...) pass through unchanged;
    /// internal variants are prefixed with `ERR`.
    pub fn to_resp_string(&self) -> String {
        let text = self.to_string();
        let has_class = text
            .split(' ')
            .next()
            .is_some_and(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_uppercase()));
        if has_class {
            text
        } else {
            format!("ERR {text}")
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for OpalDBError {
    fn from(e: std::io::Error) -> Self {
        OpalDBError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for OpalDBError {
    fn from(_: std::str::Utf8Error) -> Self {
        OpalDBError::WrongType
    }
}

impl From<std::string::FromUtf8Error> for OpalDBError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        OpalDBError::WrongType
    }
}

impl From<ParseIntError> for OpalDBError {
    fn from(_: ParseIntError) -> Self {
        OpalDBError::NotAnInteger
    }
}

impl From<ParseFloatError> for OpalDBError {
    fn from(_: ParseFloatError) -> Self {
        OpalDBError::NotAFloat
    }
}
