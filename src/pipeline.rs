//! Pipeline orchestration: transcript in, session update and viewer events out.
//!
//! [`Engine`] owns everything a running service shares: the active
//! [`VerseMatcher`], the [`Session`], the viewer [`Fanout`] and the event
//! sink. [`FragmentWorker`] feeds it one fragment at a time.
//!
//! ```text
//!  Fragment ─▶ FragmentWorker ─▶ (transcribe) ─▶ Engine::process_transcript
//!                                                   │
//!              ┌────────────────────────────────────┼──────────────┐
//!              ▼                                    ▼              ▼
//!        score + select                      Session::apply    EventSink
//!                                                   │
//!                                                   ▼
//!                                           Fanout<StateEvent>
//! ```

use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::broadcast::{Fanout, Subscription};
use crate::config::Config;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::event_log::EventSink;
use crate::events::StateEvent;
use crate::fusion;
use crate::index::{IndexError, Metric};
use crate::matcher::VerseMatcher;
use crate::models::{MatchCandidate, SessionSnapshot, TranscriptionEvent, Verse, VerseRef};
use crate::scoring::Query;
use crate::session::{Admission, Session, Transition};
use crate::transcription::{now_secs, transcribe_within, AudioSegment, Transcriber};

/// How an operator names a verse.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VerseSelector {
    Id { verse_id: i64 },
    Reference(VerseRef),
}

impl std::fmt::Display for VerseSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerseSelector::Id { verse_id } => write!(f, "id {}", verse_id),
            VerseSelector::Reference(r) => write!(f, "{}", r),
        }
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("verse not found: {0}")]
    NotFound(String),
}

/// Result of scoring one transcript without touching the session.
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub transcript: String,
    /// Best candidate at or above the threshold used.
    pub best: Option<MatchCandidate>,
    /// Ranked candidates, best first.
    pub candidates: Vec<MatchCandidate>,
    pub semantic_used: bool,
    pub latency_ms: f64,
}

impl MatchReport {
    fn empty(transcript: &str, started: Instant) -> Self {
        Self {
            transcript: transcript.to_string(),
            best: None,
            candidates: Vec::new(),
            semantic_used: false,
            latency_ms: elapsed_ms(started),
        }
    }

    /// History record: scores of the selected verse, or of the top-ranked
    /// candidate with no verse when nothing was selected.
    pub fn to_event(&self) -> TranscriptionEvent {
        let scored = self.best.as_ref().or_else(|| self.candidates.first());
        TranscriptionEvent {
            timestamp: now_secs(),
            transcript: self.transcript.clone(),
            verse_id: self.best.as_ref().map(|c| c.verse.id),
            exact_score: scored.map_or(0.0, |c| c.exact),
            fuzzy_score: scored.map_or(0.0, |c| c.fuzzy),
            semantic_score: scored.map_or(0.0, |c| c.semantic),
            fused_score: scored.map_or(0.0, |c| c.fused),
            latency_ms: self.latency_ms,
        }
    }
}

/// A processed fragment: what was scored and whether the session took it.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub report: MatchReport,
    /// `None` when no candidate reached the threshold.
    pub admission: Option<Admission>,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

pub struct Engine {
    config: Arc<Config>,
    matcher: RwLock<Arc<VerseMatcher>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    session: Session,
    fanout: Fanout<StateEvent>,
    events: Arc<dyn EventSink>,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        matcher: VerseMatcher,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let fanout = Fanout::new(config.broadcast.queue_capacity);
        Self {
            config,
            matcher: RwLock::new(Arc::new(matcher)),
            embedder,
            session: Session::new(),
            fanout,
            events,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The matcher serving right now. Callers keep using the returned
    /// snapshot even if a rebuild swaps in a new one meanwhile.
    pub fn matcher(&self) -> Arc<VerseMatcher> {
        self.matcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn catalog_len(&self) -> usize {
        self.matcher().len()
    }

    async fn semantic_hits(&self, matcher: &VerseMatcher, text: &str) -> Option<Vec<(usize, f64)>> {
        let embedder = self.embedder.as_ref()?;
        if !matcher.has_vectors() {
            return None;
        }
        let vector = match embed_query(embedder.as_ref(), text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed; scoring without semantic signal");
                return None;
            }
        };
        match matcher.semantic_hits(&vector, self.config.matching.semantic_top_k) {
            Ok(hits) => Some(hits.into_iter().map(|h| (h.position, h.similarity)).collect()),
            Err(e) => {
                tracing::warn!(error = %e, "semantic lookup failed; scoring without semantic signal");
                None
            }
        }
    }

    async fn score_since(&self, text: &str, min_score: f64, started: Instant) -> MatchReport {
        let trimmed = text.trim();
        if trimmed.chars().count() < self.config.matching.min_query_chars {
            return MatchReport::empty(trimmed, started);
        }
        let query = Query::new(trimmed);
        if query.text.is_empty() {
            return MatchReport::empty(trimmed, started);
        }

        let matcher = self.matcher();
        let hits = self.semantic_hits(&matcher, trimmed).await;
        let semantic_used = hits.is_some();
        let query = query.with_semantic(hits.unwrap_or_default());

        let mut candidates = matcher.score(&query, self.config.matching.full_scan_max);
        fusion::rank_all(&mut candidates);
        let best = fusion::select(&candidates, min_score);

        MatchReport {
            transcript: trimmed.to_string(),
            best,
            candidates,
            semantic_used,
            latency_ms: elapsed_ms(started),
        }
    }

    /// Scores and selects only; the session is not touched and nothing is
    /// recorded or published.
    pub async fn score_transcript(&self, text: &str, min_score: f64) -> MatchReport {
        self.score_since(text, min_score, Instant::now()).await
    }

    async fn process_since(&self, text: &str, started: Instant) -> MatchOutcome {
        // Taken before scoring so anything that lands meanwhile supersedes us.
        let ticket = self.session.issue_ticket();
        let report = self
            .score_since(text, self.config.matching.min_score, started)
            .await;
        self.events.record(report.to_event());

        let Some(best) = report.best.clone() else {
            return MatchOutcome {
                report,
                admission: None,
            };
        };

        // Published under the session lock so viewers see seq in commit order.
        let admission = self.session.apply_then(
            Transition::AutomaticMatchAccepted {
                candidate: best.clone(),
                seq: ticket,
            },
            |snapshot| {
                let event = StateEvent::verse_match(&report.transcript, &best, report.latency_ms, snapshot.seq);
                self.fanout.publish(event);
            },
        );
        match &admission {
            Admission::Accepted(_) => {
                tracing::info!(
                    verse = %best.verse.reference,
                    score = best.fused,
                    latency_ms = report.latency_ms,
                    "verse matched"
                );
            }
            Admission::Rejected(reason) => {
                tracing::debug!(verse = %best.verse.reference, ?reason, "match not admitted");
            }
        }

        MatchOutcome {
            report,
            admission: Some(admission),
        }
    }

    /// Scores a transcript, records it, and offers the best candidate to the
    /// session.
    pub async fn process_transcript(&self, text: &str) -> MatchOutcome {
        self.process_since(text, Instant::now()).await
    }

    /// Returns the selected candidate, whether or not the session admitted it.
    pub async fn match_transcript(&self, text: &str) -> Option<MatchCandidate> {
        self.process_transcript(text).await.report.best
    }

    fn resolve(&self, selector: &VerseSelector) -> Result<Arc<Verse>, SelectionError> {
        let matcher = self.matcher();
        let found = match selector {
            VerseSelector::Id { verse_id } => matcher.by_id(*verse_id),
            VerseSelector::Reference(r) => matcher.by_ref(r),
        };
        found.ok_or_else(|| SelectionError::NotFound(selector.to_string()))
    }

    pub fn set_manual_selection(&self, selector: &VerseSelector) -> Result<SessionSnapshot, SelectionError> {
        let verse = self.resolve(selector)?;
        let admission = self.session.apply_then(Transition::ManualOverride { verse }, |snapshot| {
            if let Some(event) = StateEvent::manual_verse(snapshot) {
                self.fanout.publish(event);
            }
        });
        Ok(self.settled(admission))
    }

    pub fn set_lock(
        &self,
        locked: bool,
        pin: Option<&VerseSelector>,
    ) -> Result<SessionSnapshot, SelectionError> {
        let pin = pin.map(|s| self.resolve(s)).transpose()?;
        let admission = self.session.apply_then(Transition::SetLock { locked, pin }, |snapshot| {
            self.fanout.publish(StateEvent::lock_status(snapshot));
        });
        let snapshot = self.settled(admission);
        tracing::info!(locked, seq = snapshot.seq, "lock changed");
        Ok(snapshot)
    }

    /// Manual and lock writes are always admitted; a rejection would only
    /// leave the current state in place.
    fn settled(&self, admission: Admission) -> SessionSnapshot {
        match admission {
            Admission::Accepted(snapshot) => snapshot,
            Admission::Rejected(_) => self.session.snapshot(),
        }
    }

    pub fn current_state(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn subscribe(&self) -> Subscription<StateEvent> {
        self.fanout.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count()
    }

    /// Builds a matcher from `catalog` and `vectors` and swaps it in. On error
    /// the previous matcher stays active.
    pub fn rebuild(&self, catalog: Vec<Verse>, vectors: Option<Vec<Vec<f32>>>) -> Result<(), IndexError> {
        let metric = Metric::from_config(&self.config.semantic.metric, self.config.semantic.distance_scale)?;
        let matcher = VerseMatcher::build(catalog, vectors, metric)?;
        self.install(matcher);
        Ok(())
    }

    /// Swaps in an already built matcher.
    pub fn install(&self, matcher: VerseMatcher) {
        let verses = matcher.len();
        *self.matcher.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(matcher);
        tracing::info!(verses, "matcher swapped");
    }
}

/// Input accepted by the [`FragmentWorker`].
#[derive(Debug, Clone)]
pub enum Fragment {
    Text(String),
    Audio(AudioSegment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    /// A waiting fragment was discarded in favor of this one.
    Replaced,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub replaced: u64,
    pub dropped: u64,
}

struct Pending {
    fragment: Fragment,
    started: Instant,
    reply: Option<oneshot::Sender<MatchOutcome>>,
}

struct Inbox {
    slot: Mutex<Option<Pending>>,
    notify: Notify,
    closed: AtomicBool,
    processed: AtomicU64,
    replaced: AtomicU64,
    dropped: AtomicU64,
}

/// Processes one fragment at a time with at most one more waiting. A newer
/// submission replaces a waiting one.
pub struct FragmentWorker {
    inbox: Arc<Inbox>,
    handle: JoinHandle<()>,
    transcribes: bool,
}

impl FragmentWorker {
    pub fn spawn(engine: Arc<Engine>, transcriber: Option<Arc<dyn Transcriber>>) -> Self {
        let inbox = Arc::new(Inbox {
            slot: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            replaced: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let transcribes = transcriber.is_some();
        let handle = tokio::spawn(run_worker(engine, transcriber, inbox.clone()));
        Self {
            inbox,
            handle,
            transcribes,
        }
    }

    /// Whether audio fragments can be handled.
    pub fn transcribes(&self) -> bool {
        self.transcribes
    }

    /// Queues `fragment` without waiting for it.
    pub fn submit(&self, fragment: Fragment) -> Submitted {
        self.enqueue(fragment, None)
    }

    /// Queues `fragment` and waits for its outcome. `None` when a newer
    /// submission replaced it before it started, or when it was dropped
    /// because transcription failed.
    pub async fn process(&self, fragment: Fragment) -> Option<MatchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(fragment, Some(tx));
        rx.await.ok()
    }

    fn enqueue(&self, fragment: Fragment, reply: Option<oneshot::Sender<MatchOutcome>>) -> Submitted {
        let previous = self
            .inbox
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Pending {
                fragment,
                started: Instant::now(),
                reply,
            });
        self.inbox.notify.notify_one();
        if previous.is_some() {
            self.inbox.replaced.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("waiting fragment superseded");
            Submitted::Replaced
        } else {
            Submitted::Queued
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.inbox.processed.load(Ordering::Relaxed),
            replaced: self.inbox.replaced.load(Ordering::Relaxed),
            dropped: self.inbox.dropped.load(Ordering::Relaxed),
        }
    }

    /// Finishes any waiting fragment, then stops.
    pub async fn shutdown(self) {
        self.inbox.closed.store(true, Ordering::SeqCst);
        self.inbox.notify.notify_one();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "fragment worker ended abnormally");
        }
    }
}

async fn run_worker(engine: Arc<Engine>, transcriber: Option<Arc<dyn Transcriber>>, inbox: Arc<Inbox>) {
    loop {
        let next = inbox
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Pending {
            fragment,
            started,
            reply,
        }) = next
        else {
            if inbox.closed.load(Ordering::SeqCst) {
                break;
            }
            inbox.notify.notified().await;
            continue;
        };

        let text = match fragment {
            Fragment::Text(text) => Some(text),
            Fragment::Audio(audio) => match &transcriber {
                Some(t) => transcribe_within(t.as_ref(), &audio, engine.config().transcription.timeout())
                    .await
                    .map(|segment| segment.text),
                None => {
                    tracing::warn!("audio fragment received but no transcriber is configured");
                    None
                }
            },
        };

        match text {
            Some(text) => {
                let outcome = engine.process_since(&text, started).await;
                inbox.processed.fetch_add(1, Ordering::Relaxed);
                if let Some(reply) = reply {
                    // The caller may have gone away.
                    let _ = reply.send(outcome);
                }
            }
            None => {
                inbox.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
