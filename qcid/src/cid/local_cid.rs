use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use super::{ConnectionId, GenerateCid};
use crate::{
    config::{CidConfig, MIN_ACTIVE_CID_LIMIT},
    error::{Error, ErrorKind},
    frame::{BeFrame, FrameType, NewConnectionIdFrame, RetireConnectionIdFrame},
    time::{Alarm, Clock},
};

/// A retired connection ID stays routable for this many PTOs, so that packets
/// already in flight towards it are still accepted.
const RETIREMENT_PTO_MULTIPLIER: u32 = 3;

/// The side effects of issuing and retiring local connection IDs.
pub trait LocalCidVisitor {
    /// Register `cid` in the packet routing table. Returns false if it
    /// collides with a connection ID already in use, the issuance is aborted.
    fn reserve_cid(&mut self, cid: &ConnectionId) -> bool;

    /// Queue the [`NewConnectionIdFrame`] to be reliably sent to the peer.
    /// Returns false if it can't be queued this time.
    fn send_new_cid_frame(&mut self, frame: &NewConnectionIdFrame) -> bool;

    /// The grace period of a retired connection ID is over, it should be
    /// removed from the packet routing table.
    fn on_cid_retired(&mut self, cid: ConnectionId);
}

/// Local connection ID management.
///
/// Each connection ID goes through `active` -> `pending_retirement` -> removed.
/// A connection ID leaves `active` when the peer retires it. When we rotate it
/// out ourselves, it waits in `retiring` until the peer retires it in turn.
/// It is removed only once its retirement deadline passed and the retire
/// alarm fired.
pub struct LocalCids<ISSUED>
where
    ISSUED: LocalCidVisitor,
{
    // ordered by sequence number
    active: VecDeque<(ConnectionId, u64)>,
    // asked to be retired through retire_prior_to, routable without deadline
    retiring: VecDeque<(ConnectionId, u64)>,
    // deadlines never decrease from front to back
    pending_retirement: VecDeque<(ConnectionId, Instant)>,
    // issued but rejected by the visitor, sent again on the next occasion
    unsent: VecDeque<NewConnectionIdFrame>,
    last_issued: ConnectionId,
    next_seq: u64,
    last_consumed_seq: u64,
    // the effective limit, min(peer's active_connection_id_limit, max_issued_cids)
    active_cid_limit: u64,
    max_issued_cids: u64,
    max_cids_in_use: usize,
    generator: Box<dyn GenerateCid>,
    clock: Arc<dyn Clock>,
    retire_alarm: Box<dyn Alarm>,
    issued_cids: ISSUED,
}

impl<ISSUED> LocalCids<ISSUED>
where
    ISSUED: LocalCidVisitor,
{
    /// Create a new local connection ID manager.
    ///
    /// `scid` is the connection ID chosen during the handshake, its sequence
    /// number is 0 and it is considered to be consumed already.
    /// Until [`LocalCids::set_limit`] is called with the peer's transport
    /// parameter, a limit of 2 is assumed.
    pub fn new(
        scid: ConnectionId,
        config: &CidConfig,
        issued_cids: ISSUED,
        generator: Box<dyn GenerateCid>,
        clock: Arc<dyn Clock>,
        retire_alarm: Box<dyn Alarm>,
    ) -> Self {
        Self {
            active: VecDeque::from([(scid, 0)]),
            retiring: VecDeque::new(),
            pending_retirement: VecDeque::new(),
            unsent: VecDeque::new(),
            last_issued: scid,
            next_seq: 1,
            last_consumed_seq: 0,
            active_cid_limit: MIN_ACTIVE_CID_LIMIT.min(config.max_issued_cids()),
            max_issued_cids: config.max_issued_cids(),
            max_cids_in_use: config.max_cids_in_use(),
            generator,
            clock,
            retire_alarm,
            issued_cids,
        }
    }

    /// Set the maximum number of active connection IDs, from the peer's
    /// active_connection_id_limit transport parameter.
    ///
    /// The value of the active_connection_id_limit parameter MUST be at least 2.
    /// An endpoint that receives a value less than 2 MUST close the connection
    /// with an error of type TRANSPORT_PARAMETER_ERROR.
    ///
    /// If the effective limit shrinks, the oldest active connection IDs are
    /// rotated out, leaving room for one new connection ID whose
    /// retire_prior_to asks the peer to retire them. They stay routable until
    /// the peer does so.
    pub fn set_limit(&mut self, active_cid_limit: u64) -> Result<(), Error> {
        if active_cid_limit < MIN_ACTIVE_CID_LIMIT {
            tracing::warn!(target: "quic", active_cid_limit, "invalid active_connection_id_limit");
            return Err(Error::new(
                ErrorKind::TransportParameter,
                FrameType::Crypto,
                format!("active_connection_id_limit {active_cid_limit} < 2"),
            ));
        }
        self.active_cid_limit = active_cid_limit.min(self.max_issued_cids);
        if self.active.len() as u64 > self.active_cid_limit {
            let excess = self.active.len() - (self.active_cid_limit as usize - 1);
            // an unsent frame always carries the newest one, which is kept
            for (cid, seq) in self.active.drain(..excess) {
                tracing::debug!(target: "quic", seq, %cid, "rotate out local connection ID");
                self.retiring.push_back((cid, seq));
            }
        }
        self.maybe_send_new_cids();
        Ok(())
    }

    pub fn limit(&self) -> u64 {
        self.active_cid_limit
    }

    /// Issue a new connection ID without sending it.
    ///
    /// Returns None, leaving everything untouched, if the limit is reached or
    /// the generator or the reservation declines; it can be tried again later.
    pub fn maybe_issue_new_cid(&mut self) -> Option<NewConnectionIdFrame> {
        if self.active.len() as u64 >= self.active_cid_limit {
            return None;
        }
        let Some(cid) = self.generator.generate_next_cid(&self.last_issued) else {
            tracing::debug!(target: "quic", "failed to generate a new connection ID");
            return None;
        };
        if !self.issued_cids.reserve_cid(&cid) {
            tracing::debug!(target: "quic", %cid, "connection ID collides with another one in use");
            return None;
        }

        let sequence = self.next_seq;
        self.next_seq += 1;
        self.last_issued = cid;
        self.active.push_back((cid, sequence));
        let reset_token = self.generator.reset_token(&cid);
        tracing::debug!(target: "quic", seq = sequence, %cid, "issue new connection ID");
        Some(NewConnectionIdFrame::new(
            cid,
            sequence,
            self.retire_prior_to(),
            reset_token,
        ))
    }

    /// Issue a connection ID for the preferred_address transport parameter,
    /// which is delivered in the handshake rather than in a frame.
    pub fn issue_cid_for_preferred_address(&mut self) -> Option<NewConnectionIdFrame> {
        self.maybe_issue_new_cid()
    }

    /// Keep issuing connection IDs until the limit is reached, or the
    /// issuance fails, or the visitor can't queue any more frames.
    pub fn maybe_send_new_cids(&mut self) {
        while let Some(mut frame) = self.unsent.pop_front() {
            if !self.active.iter().any(|(_, seq)| *seq == frame.sequence) {
                // retired before it could be sent
                continue;
            }
            frame.retire_prior_to = self.retire_prior_to();
            if !self.issued_cids.send_new_cid_frame(&frame) {
                self.unsent.push_front(frame);
                return;
            }
        }

        while (self.active.len() as u64) < self.active_cid_limit {
            let Some(frame) = self.maybe_issue_new_cid() else {
                break;
            };
            if !self.issued_cids.send_new_cid_frame(&frame) {
                self.unsent.push_back(frame);
                break;
            }
        }
    }

    /// Every connection ID prior to the oldest active one has been retired.
    fn retire_prior_to(&self) -> u64 {
        self.active.front().map_or(self.next_seq, |(_, seq)| *seq)
    }

    /// Receive a [`RetireConnectionIdFrame`] from the peer, `pto_delay` is the
    /// current probe timeout of the connection.
    ///
    /// The retired connection ID stays routable for 3 PTOs, then the visitor
    /// is told to remove it. A replacement is issued immediately.
    pub fn recv_retire_cid_frame(
        &mut self,
        frame: &RetireConnectionIdFrame,
        pto_delay: Duration,
    ) -> Result<(), Error> {
        let seq = frame.sequence;
        if seq >= self.next_seq {
            tracing::warn!(target: "quic", seq, next_seq = self.next_seq, "retire a connection ID never issued");
            return Err(Error::new(
                ErrorKind::ProtocolViolation,
                frame.frame_type(),
                format!(
                    "Sequence({seq}) in RetireConnectionIdFrame exceeds the largest one({}) issued by us",
                    self.next_seq.saturating_sub(1)
                ),
            ));
        }

        if let Some(pos) = self.retiring.iter().position(|(_, s)| *s == seq) {
            if let Some((cid, _)) = self.retiring.remove(pos) {
                tracing::debug!(target: "quic", seq, %cid, "peer retired rotated local connection ID");
                self.schedule_retirement(cid, pto_delay);
            }
            return Ok(());
        }

        let Some(pos) = self.active.iter().position(|(_, s)| *s == seq) else {
            // already retired, the deadline is not extended
            return Ok(());
        };

        if self.unretired_count() >= self.max_cids_in_use {
            tracing::warn!(target: "quic", seq, "too many connection IDs waiting to be retired");
            return Err(Error::new(
                ErrorKind::TooManyRetiringCids,
                frame.frame_type(),
                format!(
                    "there are too many connection IDs in use, the limit is {}",
                    self.max_cids_in_use
                ),
            ));
        }

        if let Some((cid, _)) = self.active.remove(pos) {
            tracing::debug!(target: "quic", seq, %cid, "peer retired local connection ID");
            self.schedule_retirement(cid, pto_delay);
        }
        self.maybe_send_new_cids();
        Ok(())
    }

    fn unretired_count(&self) -> usize {
        self.active.len() + self.retiring.len() + self.pending_retirement.len()
    }

    fn schedule_retirement(&mut self, cid: ConnectionId, pto_delay: Duration) {
        let mut deadline = self.clock.now() + pto_delay * RETIREMENT_PTO_MULTIPLIER;
        if let Some((_, last)) = self.pending_retirement.back() {
            deadline = deadline.max(*last);
        }
        self.pending_retirement.push_back((cid, deadline));
        if !self.retire_alarm.is_set() {
            self.retire_alarm.set(deadline);
        }
    }

    /// Called by the owner when the retire alarm fires. Removes every
    /// connection ID whose deadline has passed, and rearms the alarm for the
    /// next one.
    pub fn on_retire_alarm(&mut self) {
        self.retire_alarm.cancel();
        let now = self.clock.now();
        while self
            .pending_retirement
            .front()
            .is_some_and(|(_, deadline)| *deadline <= now)
        {
            let Some((cid, _)) = self.pending_retirement.pop_front() else {
                break;
            };
            tracing::debug!(target: "quic", %cid, "remove retired local connection ID");
            self.issued_cids.on_cid_retired(cid);
        }
        if let Some((_, deadline)) = self.pending_retirement.front() {
            self.retire_alarm.set(*deadline);
        }
    }

    /// Take the oldest active connection ID not handed out yet. Each one is
    /// returned at most once, in increasing sequence order.
    pub fn consume_one_cid(&mut self) -> Option<ConnectionId> {
        let (cid, seq) = *self
            .active
            .iter()
            .find(|(_, seq)| *seq > self.last_consumed_seq)?;
        self.last_consumed_seq = seq;
        tracing::debug!(target: "quic", seq, %cid, "consume local connection ID");
        Some(cid)
    }

    pub fn has_cid_to_consume(&self) -> bool {
        self.active
            .iter()
            .any(|(_, seq)| *seq > self.last_consumed_seq)
    }

    /// Get the initial source connection ID, None if it has been retired.
    pub fn initial_cid(&self) -> Option<ConnectionId> {
        self.active
            .front()
            .filter(|(_, seq)| *seq == 0)
            .map(|(cid, _)| *cid)
    }

    pub fn one_active_cid(&self) -> Option<ConnectionId> {
        self.active.front().map(|(cid, _)| *cid)
    }

    pub fn active_cids(&self) -> Vec<ConnectionId> {
        self.active.iter().map(|(cid, _)| *cid).collect()
    }

    /// All connection IDs still routed to this connection, including those
    /// waiting for removal.
    ///
    /// This method will be useful when finally releasing connection resources,
    /// as it will remove all routing table entries related to this connection.
    pub fn unretired_cids(&self) -> Vec<ConnectionId> {
        self.active
            .iter()
            .chain(self.retiring.iter())
            .map(|(cid, _)| *cid)
            .chain(self.pending_retirement.iter().map(|(cid, _)| *cid))
            .collect()
    }

    pub fn is_cid_in_use(&self, cid: &ConnectionId) -> bool {
        self.active
            .iter()
            .chain(self.retiring.iter())
            .any(|(c, _)| c == cid)
            || self.pending_retirement.iter().any(|(c, _)| c == cid)
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_seq
    }
}

impl<ISSUED> Drop for LocalCids<ISSUED>
where
    ISSUED: LocalCidVisitor,
{
    fn drop(&mut self) {
        self.retire_alarm.cancel();
    }
}

impl<ISSUED> std::fmt::Debug for LocalCids<ISSUED>
where
    ISSUED: LocalCidVisitor,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCids")
            .field("active", &self.active)
            .field("retiring", &self.retiring)
            .field("pending_retirement", &self.pending_retirement)
            .field("unsent", &self.unsent)
            .field("next_seq", &self.next_seq)
            .field("last_consumed_seq", &self.last_consumed_seq)
            .field("active_cid_limit", &self.active_cid_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::{cid::RandomCidGenerator, config::CidConfigBuilder, time::ArcAlarm};

    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    impl ManualClock {
        fn advance(&self, duration: Duration) {
            *self.0.lock().unwrap() += duration;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Debug, Default)]
    struct Issued {
        reserved: HashSet<ConnectionId>,
        frames: Vec<NewConnectionIdFrame>,
        removed: Vec<ConnectionId>,
        reject_send: bool,
    }

    #[derive(Debug, Default, Clone)]
    struct IssuedCids(Arc<Mutex<Issued>>);

    impl IssuedCids {
        fn lock_guard(&self) -> std::sync::MutexGuard<'_, Issued> {
            self.0.lock().unwrap()
        }
    }

    impl LocalCidVisitor for IssuedCids {
        fn reserve_cid(&mut self, cid: &ConnectionId) -> bool {
            self.lock_guard().reserved.insert(*cid)
        }

        fn send_new_cid_frame(&mut self, frame: &NewConnectionIdFrame) -> bool {
            let mut guard = self.lock_guard();
            if guard.reject_send {
                return false;
            }
            guard.frames.push(*frame);
            true
        }

        fn on_cid_retired(&mut self, cid: ConnectionId) {
            let mut guard = self.lock_guard();
            guard.reserved.remove(&cid);
            guard.removed.push(cid);
        }
    }

    /// Yields a fixed connection ID, to provoke collisions.
    struct StuckGenerator(u8);

    impl GenerateCid for StuckGenerator {
        fn generate_next_cid(&self, _prev: &ConnectionId) -> Option<ConnectionId> {
            ConnectionId::from_slice(&[self.0; 4])
        }
    }

    struct Harness {
        local_cids: LocalCids<IssuedCids>,
        issued: IssuedCids,
        clock: ManualClock,
        alarm: ArcAlarm,
        now: Instant,
    }

    fn harness_with(config: CidConfig, generator: Box<dyn GenerateCid>) -> Harness {
        let now = Instant::now();
        let clock = ManualClock(Arc::new(Mutex::new(now)));
        let issued = IssuedCids::default();
        let alarm = ArcAlarm::new();
        let local_cids = LocalCids::new(
            ConnectionId::from_slice(&[0xFF; 8]).unwrap(),
            &config,
            issued.clone(),
            generator,
            Arc::new(clock.clone()),
            Box::new(alarm.clone()),
        );
        Harness {
            local_cids,
            issued,
            clock,
            alarm,
            now,
        }
    }

    fn harness() -> Harness {
        harness_with(CidConfig::default(), Box::new(RandomCidGenerator::new(8)))
    }

    #[test]
    fn test_issue_up_to_limit() {
        let mut h = harness();
        assert_eq!(h.local_cids.limit(), 2);
        h.local_cids.maybe_send_new_cids();
        assert_eq!(h.local_cids.active_cids().len(), 2);
        assert_eq!(h.issued.lock_guard().frames.len(), 1);
        let frame = h.issued.lock_guard().frames[0];
        assert_eq!((frame.sequence, frame.retire_prior_to), (1, 0));

        h.local_cids.set_limit(8).unwrap();
        // capped by max_issued_cids
        assert_eq!(h.local_cids.limit(), 4);
        assert_eq!(h.local_cids.active_cids().len(), 4);
        assert_eq!(h.local_cids.next_sequence(), 4);
    }

    #[test]
    fn test_invalid_limit() {
        let mut h = harness();
        let error = h.local_cids.set_limit(1).unwrap_err();
        assert_eq!(error.kind, ErrorKind::TransportParameter);
        assert_eq!(h.local_cids.limit(), 2);
    }

    #[test]
    fn test_retire_and_backfill() {
        let mut h = harness();
        h.local_cids.maybe_send_new_cids();
        let initial = h.local_cids.initial_cid().unwrap();

        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 0 },
                Duration::from_millis(10),
            )
            .unwrap();
        assert_eq!(h.local_cids.initial_cid(), None);
        assert_eq!(h.local_cids.active_cids().len(), 2);
        assert!(h.local_cids.is_cid_in_use(&initial));
        assert_eq!(h.alarm.deadline(), Some(h.now + Duration::from_millis(30)));

        let frames = h.issued.lock_guard().frames.clone();
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[1].sequence, frames[1].retire_prior_to), (2, 1));

        // too early, nothing is removed
        h.clock.advance(Duration::from_millis(29));
        h.local_cids.on_retire_alarm();
        assert!(h.issued.lock_guard().removed.is_empty());
        assert!(h.alarm.is_set());

        h.clock.advance(Duration::from_millis(1));
        assert!(h.alarm.take_expired(h.clock.now()));
        h.local_cids.on_retire_alarm();
        assert_eq!(h.issued.lock_guard().removed, vec![initial]);
        assert!(!h.local_cids.is_cid_in_use(&initial));
        assert!(!h.alarm.is_set());
    }

    #[test]
    fn test_retire_never_issued() {
        let mut h = harness();
        h.local_cids.maybe_send_new_cids();
        let error = h
            .local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame {
                    sequence: h.local_cids.next_sequence(),
                },
                Duration::from_millis(10),
            )
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::ProtocolViolation);
        assert_eq!(error.frame_type, FrameType::RetireConnectionId);
    }

    #[test]
    fn test_retire_twice_keeps_deadline() {
        let mut h = harness();
        h.local_cids.maybe_send_new_cids();
        let frame = RetireConnectionIdFrame { sequence: 1 };
        h.local_cids
            .recv_retire_cid_frame(&frame, Duration::from_millis(10))
            .unwrap();
        let snapshot = format!("{:?}", h.local_cids);

        h.clock.advance(Duration::from_millis(5));
        h.local_cids
            .recv_retire_cid_frame(&frame, Duration::from_millis(100))
            .unwrap();
        assert_eq!(format!("{:?}", h.local_cids), snapshot);
        assert_eq!(h.alarm.deadline(), Some(h.now + Duration::from_millis(30)));
    }

    #[test]
    fn test_deadlines_never_decrease() {
        let mut h = harness();
        h.local_cids.set_limit(4).unwrap();

        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 1 },
                Duration::from_millis(100),
            )
            .unwrap();
        // a smaller pto must not schedule an earlier removal
        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 2 },
                Duration::from_millis(10),
            )
            .unwrap();
        let deadlines = h
            .local_cids
            .pending_retirement
            .iter()
            .map(|(_, deadline)| *deadline)
            .collect::<Vec<_>>();
        assert_eq!(deadlines, vec![h.now + Duration::from_millis(300); 2]);

        h.clock.advance(Duration::from_millis(300));
        h.local_cids.on_retire_alarm();
        assert_eq!(h.issued.lock_guard().removed.len(), 2);
        assert!(!h.alarm.is_set());
    }

    #[test]
    fn test_alarm_rearms_for_next_deadline() {
        let mut h = harness();
        h.local_cids.set_limit(4).unwrap();
        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 1 },
                Duration::from_millis(10),
            )
            .unwrap();
        h.clock.advance(Duration::from_millis(20));
        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 2 },
                Duration::from_millis(10),
            )
            .unwrap();
        // still armed at the first deadline
        assert_eq!(h.alarm.deadline(), Some(h.now + Duration::from_millis(30)));

        h.clock.advance(Duration::from_millis(10));
        h.local_cids.on_retire_alarm();
        assert_eq!(h.issued.lock_guard().removed.len(), 1);
        assert_eq!(h.alarm.deadline(), Some(h.now + Duration::from_millis(50)));
    }

    #[test]
    fn test_too_many_retiring() {
        let config = CidConfigBuilder::default()
            .max_issued_cids(4)
            .max_cids_in_use(5usize)
            .build()
            .unwrap();
        let mut h = harness_with(config, Box::new(RandomCidGenerator::new(8)));
        h.local_cids.set_limit(4).unwrap();
        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 0 },
                Duration::from_millis(10),
            )
            .unwrap();
        let error = h
            .local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 1 },
                Duration::from_millis(10),
            )
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::TooManyRetiringCids);
        assert!(error.is_resource_limit());
    }

    #[test]
    fn test_reservation_collision() {
        let mut h = harness_with(CidConfig::default(), Box::new(StuckGenerator(1)));
        h.local_cids.set_limit(4).unwrap();
        // the second attempt collides with the first one
        assert_eq!(h.local_cids.active_cids().len(), 2);
        assert_eq!(h.local_cids.next_sequence(), 2);
        assert!(h.local_cids.maybe_issue_new_cid().is_none());
        assert_eq!(h.local_cids.next_sequence(), 2);
    }

    #[test]
    fn test_resend_rejected_frame() {
        let mut h = harness();
        h.issued.lock_guard().reject_send = true;
        h.local_cids.maybe_send_new_cids();
        assert_eq!(h.local_cids.active_cids().len(), 2);
        assert!(h.issued.lock_guard().frames.is_empty());

        h.issued.lock_guard().reject_send = false;
        h.local_cids.maybe_send_new_cids();
        let frames = h.issued.lock_guard().frames.clone();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 1);
        assert_eq!(h.local_cids.next_sequence(), 2);
    }

    #[test]
    fn test_rotate_on_lower_limit() {
        let mut h = harness();
        h.local_cids.set_limit(4).unwrap();
        assert_eq!(h.local_cids.active_cids().len(), 4);
        let rotated = h.local_cids.active_cids()[1];

        // one replacement tells the peer to retire everything before it
        h.local_cids.set_limit(2).unwrap();
        assert_eq!(h.local_cids.active_cids().len(), 2);
        let last = *h.issued.lock_guard().frames.last().unwrap();
        assert_eq!((last.sequence, last.retire_prior_to), (4, 3));
        assert_eq!(h.local_cids.unretired_cids().len(), 5);
        assert!(!h.alarm.is_set());

        // the peer may still use them until it retires them
        h.clock.advance(Duration::from_millis(30));
        h.local_cids.on_retire_alarm();
        assert!(h.issued.lock_guard().removed.is_empty());
        assert!(h.local_cids.is_cid_in_use(&rotated));

        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 1 },
                Duration::from_millis(10),
            )
            .unwrap();
        // no replacement for a connection ID already rotated out
        assert_eq!(h.issued.lock_guard().frames.len(), 4);
        assert_eq!(h.alarm.deadline(), Some(h.now + Duration::from_millis(60)));

        h.clock.advance(Duration::from_millis(30));
        assert!(h.alarm.take_expired(h.clock.now()));
        h.local_cids.on_retire_alarm();
        assert_eq!(h.issued.lock_guard().removed, vec![rotated]);
        assert!(!h.local_cids.is_cid_in_use(&rotated));
        assert_eq!(h.local_cids.unretired_cids().len(), 4);
    }

    #[test]
    fn test_issue_within_limit() {
        let mut h = harness();
        h.local_cids.maybe_send_new_cids();
        for _ in 0..5 {
            assert!(h.local_cids.maybe_issue_new_cid().is_none());
        }
        assert!(h.local_cids.issue_cid_for_preferred_address().is_none());
        assert_eq!(h.local_cids.active_cids().len(), 2);
        assert_eq!(h.local_cids.next_sequence(), 2);
    }

    #[test]
    fn test_consume_in_order() {
        let mut h = harness();
        h.local_cids.set_limit(4).unwrap();
        let active = h.local_cids.active_cids();
        assert!(h.local_cids.has_cid_to_consume());

        let consumed = std::iter::from_fn(|| h.local_cids.consume_one_cid()).collect::<Vec<_>>();
        // the initial one is consumed by the handshake
        assert_eq!(consumed, active[1..]);
        assert!(!h.local_cids.has_cid_to_consume());

        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 1 },
                Duration::from_millis(10),
            )
            .unwrap();
        let backfilled = h.local_cids.consume_one_cid().unwrap();
        assert_eq!(backfilled, *h.local_cids.active_cids().last().unwrap());
        assert_eq!(h.local_cids.consume_one_cid(), None);
    }

    #[test]
    fn test_preferred_address_cid() {
        let mut h = harness();
        let frame = h.local_cids.issue_cid_for_preferred_address().unwrap();
        assert_eq!(frame.sequence, 1);
        assert!(h.issued.lock_guard().frames.is_empty());
        assert!(h.local_cids.is_cid_in_use(&frame.id));
        assert_eq!(h.local_cids.one_active_cid(), h.local_cids.initial_cid());
    }

    #[test]
    fn test_drop_cancels_alarm() {
        let mut h = harness();
        h.local_cids.maybe_send_new_cids();
        h.local_cids
            .recv_retire_cid_frame(
                &RetireConnectionIdFrame { sequence: 0 },
                Duration::from_millis(10),
            )
            .unwrap();
        assert!(h.alarm.is_set());
        let Harness {
            local_cids, alarm, ..
        } = h;
        drop(local_cids);
        assert!(!alarm.is_set());
    }
}
