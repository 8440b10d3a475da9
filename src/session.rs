//! The live "currently displayed" selection and lock flag.
//!
//! There is exactly one [`Session`] per process. Every read and write goes
//! through a single mutex, so readers always get a consistent
//! [`SessionSnapshot`] and concurrent writers are ordered by sequence number
//! rather than by arrival time.
//!
//! # Sequence tickets
//!
//! Sequence numbers come from one monotonically increasing counter. A
//! transcript fragment takes a ticket with [`Session::issue_ticket`] when
//! scoring starts; manual and lock writes draw a fresh number inside the
//! lock. An automatic match is admitted only when its ticket is greater than
//! the current sequence number, so a slow match can never overwrite a manual
//! choice (or a newer match) made while it was being scored.
//!
//! ```text
//!                 ManualOverride / SetLock(pin)
//!        ┌──────────────────────────────────────────┐
//!        ▼                                          │
//!  Unlocked/None ──Automatic──▶ Unlocked/Has ──SetLock(true)──▶ Locked/Has
//!                                   ▲                               │
//!                                   └──────── SetLock(false) ───────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::{MatchCandidate, SessionSnapshot, Verse, VersePayload, WriterKind};

#[derive(Debug, Clone)]
pub enum Transition {
    AutomaticMatchAccepted { candidate: MatchCandidate, seq: u64 },
    ManualOverride { verse: Arc<Verse> },
    /// Changes only the flag, unless a `pin` is supplied while locking.
    SetLock { locked: bool, pin: Option<Arc<Verse>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Locked,
    Stale { ticket: u64, current: u64 },
}

#[derive(Debug, Clone)]
pub enum Admission {
    Accepted(SessionSnapshot),
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted(_))
    }
}

#[derive(Debug, Default)]
struct SessionState {
    current: Option<Arc<Verse>>,
    locked: bool,
    seq: u64,
    last_writer: Option<WriterKind>,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            verse: self.current.as_deref().map(VersePayload::from),
            locked: self.locked,
            seq: self.seq,
            last_writer: self.last_writer,
        }
    }
}

#[derive(Debug, Default)]
pub struct Session {
    state: Mutex<SessionState>,
    counter: AtomicU64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reserves a sequence number for a fragment about to be scored.
    pub fn issue_ticket(&self) -> u64 {
        self.next_seq()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub fn current_verse(&self) -> Option<Arc<Verse>> {
        self.lock().current.clone()
    }

    pub fn apply(&self, transition: Transition) -> Admission {
        self.apply_then(transition, |_| {})
    }

    /// Like [`Session::apply`], but runs `on_accepted` with the new snapshot
    /// before the lock is released. Whatever it emits is therefore ordered
    /// exactly like the state changes. It must not block.
    pub fn apply_then<F>(&self, transition: Transition, on_accepted: F) -> Admission
    where
        F: FnOnce(&SessionSnapshot),
    {
        let mut state = self.lock();
        match transition {
            Transition::AutomaticMatchAccepted { candidate, seq } => {
                if state.locked {
                    tracing::debug!(ticket = seq, "automatic match rejected: session locked");
                    return Admission::Rejected(RejectReason::Locked);
                }
                if seq <= state.seq {
                    tracing::debug!(ticket = seq, current = state.seq, "automatic match rejected: stale");
                    return Admission::Rejected(RejectReason::Stale {
                        ticket: seq,
                        current: state.seq,
                    });
                }
                state.current = Some(candidate.verse);
                state.seq = seq;
                state.last_writer = Some(WriterKind::Automatic);
            }
            Transition::ManualOverride { verse } => {
                state.current = Some(verse);
                state.seq = self.next_seq();
                state.last_writer = Some(WriterKind::Manual);
            }
            Transition::SetLock { locked, pin } => {
                state.locked = locked;
                if locked {
                    if let Some(verse) = pin {
                        state.current = Some(verse);
                    }
                }
                state.seq = self.next_seq();
                state.last_writer = Some(WriterKind::Manual);
            }
        }
        let snapshot = state.snapshot();
        on_accepted(&snapshot);
        Admission::Accepted(snapshot)
    }
}
