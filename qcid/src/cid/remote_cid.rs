use std::sync::Arc;

use super::{ConnectionId, ConnectionIdRecord};
use crate::{
    config::CidConfig,
    error::{Error, ErrorKind},
    frame::{BeFrame, NewConnectionIdFrame},
    time::{Alarm, Clock},
    token::ResetToken,
    util::RangeSet,
};

/// Receives the notification that some peer-issued connection IDs are waiting
/// to be retired, the owner should then drain them with
/// [`RemoteCids::drain_retired_seqs`] and send RETIRE_CONNECTION_ID frames.
pub trait RemoteCidVisitor {
    fn on_peer_issued_cid_retired(&mut self);
}

/// How a NEW_CONNECTION_ID frame was absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewCidOutcome {
    /// The connection ID is ready to be consumed.
    Unused,
    /// The connection ID arrived already covered by a retire_prior_to,
    /// it goes straight to retirement.
    Retired,
    /// The sequence number has been processed before, nothing changed.
    Duplicate,
}

/// The connection IDs issued by the peer.
///
/// - `active`: in use as destination connection ID by some path;
/// - `unused`: announced by the peer, not consumed yet;
/// - `to_be_retired`: must be retired with RETIRE_CONNECTION_ID frames.
///
/// `active` and `unused` together never exceed the active_connection_id_limit
/// we advertised.
pub struct RemoteCids<RETIRED>
where
    RETIRED: RemoteCidVisitor,
{
    active: Vec<ConnectionIdRecord>,
    unused: Vec<ConnectionIdRecord>,
    to_be_retired: Vec<ConnectionIdRecord>,
    // the largest retire_prior_to received, never decreases
    max_retire_prior_to: u64,
    // sequence numbers of all processed NEW_CONNECTION_ID frames
    recent_seqs: RangeSet,
    active_cid_limit: u64,
    max_seq_intervals: usize,
    clock: Arc<dyn Clock>,
    retire_alarm: Box<dyn Alarm>,
    retired_cids: RETIRED,
}

impl<RETIRED> RemoteCids<RETIRED>
where
    RETIRED: RemoteCidVisitor,
{
    /// Create the tracker with the connection ID the peer chose during the
    /// handshake, whose sequence number is 0.
    pub fn new(
        initial_dcid: ConnectionId,
        config: &CidConfig,
        retired_cids: RETIRED,
        clock: Arc<dyn Clock>,
        retire_alarm: Box<dyn Alarm>,
    ) -> Self {
        let mut recent_seqs = RangeSet::new();
        recent_seqs.insert_one(0);
        Self {
            active: vec![ConnectionIdRecord::new(
                initial_dcid,
                0,
                ResetToken::default(),
            )],
            unused: Vec::new(),
            to_be_retired: Vec::new(),
            max_retire_prior_to: 0,
            recent_seqs,
            active_cid_limit: config.active_cid_limit(),
            max_seq_intervals: config.max_seq_intervals(),
            clock,
            retire_alarm,
            retired_cids,
        }
    }

    /// Attach the stateless reset token learned from the peer's transport
    /// parameters to the initial connection ID.
    pub fn set_initial_reset_token(&mut self, reset_token: ResetToken) {
        if let Some(record) = self
            .active
            .iter_mut()
            .chain(self.to_be_retired.iter_mut())
            .find(|record| record.sequence == 0)
        {
            record.reset_token = reset_token;
        }
    }

    /// Receive a [`NewConnectionIdFrame`] from the peer.
    ///
    /// Reordered or retransmitted frames are absorbed as
    /// [`NewCidOutcome::Duplicate`]. Any error is fatal to the connection.
    pub fn recv_new_cid_frame(
        &mut self,
        frame: &NewConnectionIdFrame,
    ) -> Result<NewCidOutcome, Error> {
        let seq = frame.sequence;
        // The value in the Retire Prior To field MUST be less than or equal to the value in the
        // Sequence Number field. Receiving a value in the Retire Prior To field that is greater
        // than that in the Sequence Number field MUST be treated as a connection error of type
        // FRAME_ENCODING_ERROR.
        if frame.retire_prior_to > seq {
            return Err(self.fail(
                ErrorKind::FrameEncoding,
                frame,
                format!("retire_prior_to({}) > sequence({seq})", frame.retire_prior_to),
            ));
        }
        if frame.id.is_empty() {
            return Err(self.fail(
                ErrorKind::FrameEncoding,
                frame,
                "zero-length connection ID in NEW_CONNECTION_ID frame".to_owned(),
            ));
        }

        if self.recent_seqs.contains(seq) {
            tracing::trace!(target: "quic", seq, "duplicate NEW_CONNECTION_ID frame");
            return Ok(NewCidOutcome::Duplicate);
        }
        if self.contains_cid(&frame.id) {
            return Err(self.fail(
                ErrorKind::ProtocolViolation,
                frame,
                format!("NEW_CONNECTION_ID frame reuses a previously seen id {}", frame.id),
            ));
        }

        self.recent_seqs.insert_one(seq);
        if self.recent_seqs.intervals() > self.max_seq_intervals {
            return Err(self.fail(
                ErrorKind::ProtocolViolation,
                frame,
                format!(
                    "too many disjoint connection ID sequence number intervals, more than {}",
                    self.max_seq_intervals
                ),
            ));
        }

        if frame.retire_prior_to > self.max_retire_prior_to {
            self.max_retire_prior_to = frame.retire_prior_to;
            self.retire_prior_to(frame.retire_prior_to);
        }

        let record = ConnectionIdRecord::new(frame.id, seq, frame.reset_token);
        if seq < self.max_retire_prior_to {
            tracing::debug!(target: "quic", seq, cid = %frame.id, "peer issued an already retired connection ID");
            self.to_be_retired.push(record);
            self.arm_retire_alarm();
            return Ok(NewCidOutcome::Retired);
        }

        if (self.active.len() + self.unused.len()) as u64 >= self.active_cid_limit {
            return Err(self.fail(
                ErrorKind::ConnectionIdLimit,
                frame,
                format!(
                    "peer provides more connection IDs than the limit {}",
                    self.active_cid_limit
                ),
            ));
        }

        tracing::debug!(target: "quic", seq, cid = %frame.id, "peer issued a new connection ID");
        self.unused.push(record);
        Ok(NewCidOutcome::Unused)
    }

    fn fail(&self, kind: ErrorKind, frame: &NewConnectionIdFrame, reason: String) -> Error {
        tracing::warn!(target: "quic", seq = frame.sequence, ?kind, %reason, "invalid NEW_CONNECTION_ID frame");
        Error::new(kind, frame.frame_type(), reason)
    }

    fn contains_cid(&self, cid: &ConnectionId) -> bool {
        self.active
            .iter()
            .chain(self.unused.iter())
            .chain(self.to_be_retired.iter())
            .any(|record| record.id == *cid)
    }

    /// Move the active and unused connection IDs whose sequence is less than
    /// `seq` to retirement.
    fn retire_prior_to(&mut self, seq: u64) {
        let before = self.to_be_retired.len();
        for cids in [&mut self.active, &mut self.unused] {
            let (retired, kept): (Vec<_>, Vec<_>) = std::mem::take(cids)
                .into_iter()
                .partition(|record| record.sequence < seq);
            *cids = kept;
            self.to_be_retired.extend(retired);
        }
        if self.to_be_retired.len() > before {
            tracing::debug!(target: "quic", retire_prior_to = seq, "retire peer issued connection IDs");
            self.arm_retire_alarm();
        }
    }

    fn arm_retire_alarm(&mut self) {
        // the notification is deferred out of the frame processing
        if !self.retire_alarm.is_set() {
            self.retire_alarm.set(self.clock.now());
        }
    }

    /// Take the most recently announced unused connection ID into use.
    pub fn consume_one_unused_cid(&mut self) -> Option<ConnectionIdRecord> {
        let record = self.unused.pop()?;
        tracing::debug!(target: "quic", seq = record.sequence, cid = %record.id, "consume peer issued connection ID");
        self.active.push(record);
        Some(record)
    }

    pub fn has_unused_cid(&self) -> bool {
        !self.unused.is_empty()
    }

    pub fn is_cid_active(&self, cid: &ConnectionId) -> bool {
        self.active.iter().any(|record| record.id == *cid)
    }

    pub fn active_cids(&self) -> Vec<ConnectionId> {
        self.active.iter().map(|record| record.id).collect()
    }

    /// Retire an active connection ID no longer used by any path.
    /// Retiring it again is a no-op.
    pub fn retire_cid(&mut self, cid: &ConnectionId) {
        if let Some(pos) = self.active.iter().position(|record| record.id == *cid) {
            let record = self.active.remove(pos);
            tracing::debug!(target: "quic", seq = record.sequence, %cid, "retire peer issued connection ID");
            self.to_be_retired.push(record);
            self.arm_retire_alarm();
        }
    }

    /// Retire every active connection ID that is not among `cids_on_path`,
    /// typically after a path has been abandoned.
    pub fn retire_cids_not_on_path(&mut self, cids_on_path: &[ConnectionId]) {
        let stale = self
            .active
            .iter()
            .filter(|record| !cids_on_path.contains(&record.id))
            .map(|record| record.id)
            .collect::<Vec<_>>();
        for cid in stale {
            self.retire_cid(&cid);
        }
    }

    /// Replace an active connection ID in place, keeping its sequence number
    /// and reset token.
    ///
    /// Only when the client initially connects to the server, a temporary
    /// initial dcid is used; when a response packet is received from the
    /// server, it should be replaced by the scid of the response packet.
    pub fn replace_cid(&mut self, old: &ConnectionId, new: ConnectionId) {
        if let Some(record) = self.active.iter_mut().find(|record| record.id == *old) {
            tracing::debug!(target: "quic", seq = record.sequence, %old, %new, "replace peer issued connection ID");
            record.id = new;
        }
    }

    pub fn has_pending_retirement(&self) -> bool {
        !self.to_be_retired.is_empty()
    }

    /// Take the sequence numbers of the connection IDs to be retired, each of
    /// them must be sent to the peer in a RETIRE_CONNECTION_ID frame.
    pub fn drain_retired_seqs(&mut self) -> Vec<u64> {
        self.to_be_retired
            .drain(..)
            .map(|record| record.sequence)
            .collect()
    }

    pub fn max_retire_prior_to(&self) -> u64 {
        self.max_retire_prior_to
    }

    /// Called by the owner when the retire alarm fires.
    pub fn on_retire_alarm(&mut self) {
        self.retire_alarm.cancel();
        if !self.to_be_retired.is_empty() {
            self.retired_cids.on_peer_issued_cid_retired();
        }
    }
}

impl<RETIRED> Drop for RemoteCids<RETIRED>
where
    RETIRED: RemoteCidVisitor,
{
    fn drop(&mut self) {
        self.retire_alarm.cancel();
    }
}

impl<RETIRED> std::fmt::Debug for RemoteCids<RETIRED>
where
    RETIRED: RemoteCidVisitor,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCids")
            .field("active", &self.active)
            .field("unused", &self.unused)
            .field("to_be_retired", &self.to_be_retired)
            .field("max_retire_prior_to", &self.max_retire_prior_to)
            .field("recent_seqs", &self.recent_seqs)
            .field("active_cid_limit", &self.active_cid_limit)
            .finish()
    }
}
