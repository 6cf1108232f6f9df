mod connection_id;
pub use connection_id::*;

mod local_cid;
pub use local_cid::*;

mod remote_cid;
pub use remote_cid::*;

use crate::token::ResetToken;

/// A connection ID issued by the peer, together with the sequence number and
/// the stateless reset token announced in the same NEW_CONNECTION_ID frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionIdRecord {
    pub id: ConnectionId,
    pub sequence: u64,
    pub reset_token: ResetToken,
}

impl ConnectionIdRecord {
    pub fn new(id: ConnectionId, sequence: u64, reset_token: ResetToken) -> Self {
        Self {
            id,
            sequence,
            reset_token,
        }
    }
}

/// Produces the connection IDs this endpoint issues to its peer.
///
/// Connection IDs MUST NOT contain any information that can be used by an
/// external observer to correlate them with other connection IDs for the same
/// connection, see [Section 5.1](https://www.rfc-editor.org/rfc/rfc9000.html#section-5.1)
/// of [RFC9000](https://www.rfc-editor.org/rfc/rfc9000.html).
pub trait GenerateCid {
    /// Derive the next connection ID from the last issued one.
    ///
    /// Returning `None` aborts the current issuance, it will be retried on the
    /// next opportunity.
    fn generate_next_cid(&self, prev: &ConnectionId) -> Option<ConnectionId>;

    /// The stateless reset token announced along with `cid`.
    fn reset_token(&self, _cid: &ConnectionId) -> ResetToken {
        ResetToken::random_gen()
    }
}

/// Generates random connection IDs of a fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomCidGenerator {
    len: usize,
}

impl RandomCidGenerator {
    pub fn new(len: usize) -> Self {
        debug_assert!((1..=MAX_CID_SIZE).contains(&len));
        Self { len }
    }
}

impl GenerateCid for RandomCidGenerator {
    fn generate_next_cid(&self, prev: &ConnectionId) -> Option<ConnectionId> {
        // a collision with the previous one is left to the reservation
        let cid = ConnectionId::random_gen(self.len);
        (cid != *prev).then_some(cid)
    }
}
