//! The frames carrying connection IDs, as seen by the trackers.
//!
//! Encoding and decoding belong to the packet layer; these types only carry
//! the decoded fields.

use crate::{cid::ConnectionId, token::ResetToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Transport parameters are carried in CRYPTO frames.
    Crypto,
    NewConnectionId,
    RetireConnectionId,
}

impl From<FrameType> for u64 {
    fn from(value: FrameType) -> Self {
        match value {
            FrameType::Crypto => 0x06,
            FrameType::NewConnectionId => 0x18,
            FrameType::RetireConnectionId => 0x19,
        }
    }
}

pub trait BeFrame {
    fn frame_type(&self) -> FrameType;
}

/// NEW_CONNECTION_ID frame.
///
/// ```text
/// NEW_CONNECTION_ID Frame {
///   Type (i) = 0x18,
///   Sequence Number (i),
///   Retire Prior To (i),
///   Length (8),
///   Connection ID (8..160),
///   Stateless Reset Token (128),
/// }
/// ```
///
/// See [NEW_CONNECTION_ID Frames](https://www.rfc-editor.org/rfc/rfc9000.html#name-new_connection_id-frames)
/// of [QUIC](https://www.rfc-editor.org/rfc/rfc9000.html) for more details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewConnectionIdFrame {
    pub sequence: u64,
    pub retire_prior_to: u64,
    pub id: ConnectionId,
    pub reset_token: ResetToken,
}

impl NewConnectionIdFrame {
    pub fn new(
        id: ConnectionId,
        sequence: u64,
        retire_prior_to: u64,
        reset_token: ResetToken,
    ) -> Self {
        Self {
            sequence,
            retire_prior_to,
            id,
            reset_token,
        }
    }
}

impl BeFrame for NewConnectionIdFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::NewConnectionId
    }
}

/// RETIRE_CONNECTION_ID frame.
///
/// ```text
/// RETIRE_CONNECTION_ID Frame {
///   Type (i) = 0x19,
///   Sequence Number (i),
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetireConnectionIdFrame {
    pub sequence: u64,
}

impl BeFrame for RetireConnectionIdFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::RetireConnectionId
    }
}
