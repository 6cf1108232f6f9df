use thiserror::Error;

use crate::frame::FrameType;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    FrameEncoding,
    TransportParameter,
    ConnectionIdLimit,
    ProtocolViolation,
    /// The peer retires connection IDs faster than they can be drained.
    TooManyRetiringCids,
}

impl From<ErrorKind> for u64 {
    fn from(value: ErrorKind) -> Self {
        match value {
            ErrorKind::FrameEncoding => 0x07,
            ErrorKind::TransportParameter => 0x08,
            ErrorKind::ConnectionIdLimit => 0x09,
            ErrorKind::ProtocolViolation => 0x0a,
            // no dedicated code on the wire
            ErrorKind::TooManyRetiringCids => 0x0a,
        }
    }
}

/// A fatal error of the connection ID management, the connection should be
/// closed with a CONNECTION_CLOSE frame carrying the error code of `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("QUIC transport error occured in {frame_type:?}, kind: {kind:?}, reason: {reason}")]
pub struct Error {
    pub kind: ErrorKind,
    pub frame_type: FrameType,
    pub reason: String,
}

impl Error {
    pub fn new(kind: ErrorKind, frame_type: FrameType, reason: impl Into<String>) -> Self {
        Self {
            kind,
            frame_type,
            reason: reason.into(),
        }
    }

    /// Whether the peer exhausted a resource limit, rather than contradicting
    /// itself. Both are fatal, the distinction only matters for diagnostics.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionIdLimit | ErrorKind::TooManyRetiringCids
        )
    }

    pub fn error_code(&self) -> u64 {
        self.kind.into()
    }
}
