//! Debounced push scheduling
//!
//! Pure bookkeeping: callers feed poll observations and timer expiries with
//! an explicit `now`, and the scheduler answers whether to arm, wait, or
//! push. It owns the last-pushed marker, the suppression flag and the
//! single in-flight slot; the session task owns the actual timers.
//!
//! The marker doubles as the last-applied state: an incoming remote state
//! equal to it is an echo, anything else is applied.

use crate::snapshot::SnapshotDigest;
use std::time::Duration;
use tokio::time::Instant;

/// Result of one poll observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Remote application in progress; observation ignored
    Suppressed,
    /// Pushing is blocked until the user acts
    Blocked,
    /// Matches the last pushed (or applied) state
    Unchanged,
    /// New change seen; debounce (re)started
    Armed(Instant),
    /// Same change already waiting for its deadline
    StillPending(Instant),
}

/// Result of a debounce expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Push this state now
    Push(SnapshotDigest),
    /// Store changed since arming; quiet period restarted
    Rearmed(Instant),
    /// Nothing left to push
    Idle,
    /// A push is in flight or pushing is not allowed right now
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    digest: SnapshotDigest,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    digest: SnapshotDigest,
    epoch: u64,
}

/// Debounce and loop-suppression state of one session
#[derive(Debug)]
pub struct PushScheduler {
    debounce: Duration,
    last_pushed: Option<SnapshotDigest>,
    suppressed: bool,
    blocked: bool,
    pending: Option<Pending>,
    in_flight: Option<InFlight>,
    apply_epoch: u64,
}

impl PushScheduler {
    /// Create scheduler with the given quiet period
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_pushed: None,
            suppressed: false,
            blocked: false,
            pending: None,
            in_flight: None,
            apply_epoch: 0,
        }
    }

    /// Declare `digest` as already in sync with the remote
    pub fn set_baseline(&mut self, digest: SnapshotDigest) {
        self.last_pushed = Some(digest);
        if self.pending.is_some_and(|p| p.digest == digest) {
            self.pending = None;
        }
    }

    /// Last state pushed or applied
    #[inline]
    #[must_use]
    pub fn last_pushed(&self) -> Option<SnapshotDigest> {
        self.last_pushed
    }

    /// Whether a remote application is settling
    #[inline]
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Whether a push is in flight
    #[inline]
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether pushes wait for user action
    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Debounce deadline, if a change is waiting
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    /// Whether an incoming remote state needs no local application
    ///
    /// True for the last pushed or applied state, and for the push in flight
    /// unless a remote application overtook it. An overtaken push may still
    /// win remotely, so its echo must be applied.
    #[must_use]
    pub fn is_echo(&self, digest: SnapshotDigest) -> bool {
        self.last_pushed == Some(digest)
            || self
                .in_flight
                .is_some_and(|f| f.digest == digest && f.epoch == self.apply_epoch)
    }

    /// One poll tick's comparison step
    pub fn observe(&mut self, current: SnapshotDigest, now: Instant) -> PollOutcome {
        if self.suppressed {
            return PollOutcome::Suppressed;
        }
        if self.blocked {
            return PollOutcome::Blocked;
        }
        if self.last_pushed == Some(current) {
            // edit reverted before its push went out
            self.pending = None;
            return PollOutcome::Unchanged;
        }
        if self.in_flight.is_some_and(|f| f.digest == current) {
            self.pending = None;
            return PollOutcome::Unchanged;
        }
        match self.pending {
            Some(p) if p.digest == current => PollOutcome::StillPending(p.deadline),
            _ => PollOutcome::Armed(self.arm(current, now)),
        }
    }

    /// Debounce deadline reached; `current` is the store as of now
    pub fn on_deadline(&mut self, current: SnapshotDigest, now: Instant) -> FireOutcome {
        let Some(pending) = self.pending else {
            return FireOutcome::Idle;
        };
        if self.in_flight.is_some() || self.blocked {
            return FireOutcome::Deferred;
        }
        if self.suppressed {
            return FireOutcome::Rearmed(self.arm(current, now));
        }
        if pending.digest != current {
            return FireOutcome::Rearmed(self.arm(current, now));
        }
        self.pending = None;
        if self.last_pushed == Some(current) {
            return FireOutcome::Idle;
        }
        self.start(current);
        FireOutcome::Push(current)
    }

    /// Push `current` immediately if it differs from the last push
    ///
    /// Returns `None` while suppressed, blocked or already in flight; in
    /// the in-flight case the change stays armed and goes out after the
    /// current push completes.
    pub fn flush(&mut self, current: SnapshotDigest, now: Instant) -> Option<SnapshotDigest> {
        if self.suppressed || self.blocked || self.last_pushed == Some(current) {
            return None;
        }
        if self.in_flight.is_some() {
            self.pending = Some(Pending {
                digest: current,
                deadline: now,
            });
            return None;
        }
        self.pending = None;
        self.start(current);
        Some(current)
    }

    /// Record the outcome of the in-flight push
    ///
    /// A push overtaken by a remote application does not move the marker;
    /// the applied state stays the baseline until the commit's echo arrives.
    pub fn complete(&mut self, ok: bool) -> Option<SnapshotDigest> {
        let flight = self.in_flight.take()?;
        if ok && flight.epoch == self.apply_epoch {
            self.last_pushed = Some(flight.digest);
        }
        Some(flight.digest)
    }

    /// A remote state was written locally as `applied`; suppress polling
    /// until [`end_remote_apply`](Self::end_remote_apply)
    pub fn begin_remote_apply(&mut self, applied: SnapshotDigest) {
        self.suppressed = true;
        self.pending = None;
        self.apply_epoch += 1;
        self.last_pushed = Some(applied);
    }

    /// Settle delay elapsed
    pub fn end_remote_apply(&mut self) {
        self.suppressed = false;
    }

    /// Stop pushing until [`unblock`](Self::unblock)
    pub fn block(&mut self) {
        self.blocked = true;
        self.pending = None;
    }

    /// Allow pushing again
    pub fn unblock(&mut self) {
        self.blocked = false;
    }

    fn arm(&mut self, digest: SnapshotDigest, now: Instant) -> Instant {
        let deadline = now + self.debounce;
        self.pending = Some(Pending { digest, deadline });
        deadline
    }

    fn start(&mut self, digest: SnapshotDigest) {
        self.in_flight = Some(InFlight {
            digest,
            epoch: self.apply_epoch,
        });
    }
}
