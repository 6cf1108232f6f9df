use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

/// Source of the current time for the trackers.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A single-shot, reschedulable alarm.
///
/// The tracker holding the alarm only arms or cancels it. Whoever drives the
/// connection watches the deadline and, once it is reached, calls back into
/// the tracker's `on_retire_alarm`.
pub trait Alarm {
    /// Arm the alarm at `deadline`, replacing the previous deadline if any.
    fn set(&mut self, deadline: Instant);

    fn cancel(&mut self);

    fn deadline(&self) -> Option<Instant>;

    fn is_set(&self) -> bool {
        self.deadline().is_some()
    }
}

/// A shared alarm deadline.
///
/// The tracker owns one clone and arms it, the connection's event loop keeps
/// another one to learn when the tracker must be called back.
#[derive(Debug, Default, Clone)]
pub struct ArcAlarm(Arc<Mutex<Option<Instant>>>);

impl ArcAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_guard(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        // the deadline stays consistent even if a holder panicked
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Disarm the alarm and return true if its deadline has been reached.
    ///
    /// The caller must invoke the retirement handler of the tracker when this
    /// returns true.
    pub fn take_expired(&self, now: Instant) -> bool {
        let mut deadline = self.lock_guard();
        match *deadline {
            Some(at) if at <= now => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Alarm for ArcAlarm {
    fn set(&mut self, deadline: Instant) {
        tracing::trace!(target: "quic", ?deadline, "arm retire alarm");
        *self.lock_guard() = Some(deadline);
    }

    fn cancel(&mut self) {
        *self.lock_guard() = None;
    }

    fn deadline(&self) -> Option<Instant> {
        *self.lock_guard()
    }
}
