use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scripture_sync::broadcast::TryRecvError;
use scripture_sync::config::Config;
use scripture_sync::embedding::EmbeddingProvider;
use scripture_sync::event_log::MemoryEventLog;
use scripture_sync::events::StateEvent;
use scripture_sync::index::Metric;
use scripture_sync::matcher::VerseMatcher;
use scripture_sync::models::{Verse, VerseRef, WriterKind};
use scripture_sync::normalize::normalize;
use scripture_sync::pipeline::{Engine, Fragment, FragmentWorker, Submitted, VerseSelector};
use scripture_sync::session::{Admission, RejectReason};
use scripture_sync::transcription::{AudioSegment, TranscriptSegment, Transcriber};

const JOHN: &str = "For God so loved the world that he gave his only Son";
const PSALM: &str = "The LORD is my shepherd; I shall not want.";
const GENESIS: &str = "In the beginning God created the heaven and the earth.";

/// Maps text onto three topic axes by keyword count.
struct TopicEmbedder {
    delay: Duration,
}

const TOPICS: [&[&str]; 3] = [
    &["god", "love", "loved", "world", "son"],
    &["lord", "shepherd", "want", "pastures"],
    &["beginning", "created", "heaven", "earth"],
];

fn topic_vector(text: &str) -> Vec<f32> {
    let norm = normalize(text);
    let mut v = vec![0.0f32; 4];
    for token in norm.tokens() {
        for (axis, words) in TOPICS.iter().enumerate() {
            if words.contains(&token) {
                v[axis] += 1.0;
            }
        }
    }
    let len = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if len == 0.0 {
        v[3] = 1.0;
    } else {
        v.iter_mut().for_each(|x| *x /= len);
    }
    v
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-test"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }
}

/// Topic embedder that records how many calls overlap.
#[derive(Default)]
struct OverlapEmbedder {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for OverlapEmbedder {
    fn model_name(&self) -> &str {
        "overlap-test"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }
}

struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("connection refused")
    }
}

struct ScriptedTranscriber {
    text: &'static str,
    delay: Duration,
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &AudioSegment) -> Result<TranscriptSegment> {
        tokio::time::sleep(self.delay).await;
        Ok(TranscriptSegment {
            text: self.text.to_string(),
            confidence: 0.8,
            timestamp: 0.0,
        })
    }
}

fn catalog() -> Vec<Verse> {
    [("John", 3, 16, JOHN), ("Psalm", 23, 1, PSALM), ("Genesis", 1, 1, GENESIS)]
        .iter()
        .enumerate()
        .map(|(i, (book, chapter, verse, text))| {
            Verse::new(
                i as i64 + 1,
                VerseRef {
                    translation: "KJV".into(),
                    book: book.to_string(),
                    chapter: *chapter,
                    verse: *verse,
                },
                *text,
                i,
            )
        })
        .collect()
}

fn test_config() -> Config {
    let mut config = Config::with_db_path("unused.sqlite");
    config.semantic.metric = "cosine".to_string();
    config.transcription.timeout_ms = 100;
    config
}

fn build_engine(
    config: Config,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> (Arc<Engine>, Arc<MemoryEventLog>) {
    let verses = catalog();
    let vectors = embedder
        .as_ref()
        .map(|_| verses.iter().map(|v| topic_vector(&v.text)).collect());
    let metric = Metric::from_config(&config.semantic.metric, config.semantic.distance_scale).unwrap();
    let matcher = VerseMatcher::build(verses, vectors, metric).unwrap();
    let log = Arc::new(MemoryEventLog::new());
    let engine = Engine::new(Arc::new(config), matcher, embedder, log.clone());
    (Arc::new(engine), log)
}

fn topic_engine() -> (Arc<Engine>, Arc<MemoryEventLog>) {
    build_engine(
        test_config(),
        Some(Arc::new(TopicEmbedder {
            delay: Duration::ZERO,
        })),
    )
}

#[tokio::test]
async fn test_literal_quote_is_selected_and_broadcast() {
    let (engine, log) = topic_engine();
    let mut viewer = engine.subscribe();

    let outcome = engine.process_transcript("For God so loved the world").await;
    let best = outcome.report.best.clone().expect("quote should match");
    assert_eq!(best.verse.reference.book, "John");
    assert!((best.exact - 1.0).abs() < 1e-9);
    assert!(best.fused >= 0.6);
    assert!(matches!(outcome.admission, Some(Admission::Accepted(_))));

    let state = engine.current_state();
    assert_eq!(state.verse.unwrap().id, best.verse.id);
    assert_eq!(state.last_writer, Some(WriterKind::Automatic));

    match viewer.try_recv() {
        Ok(StateEvent::VerseMatch { verse, score, .. }) => {
            assert_eq!(verse.id, best.verse.id);
            assert_eq!(score, best.fused);
        }
        other => panic!("expected verse_match, got {:?}", other),
    }

    let events = log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].verse_id, Some(best.verse.id));
    assert!(events[0].latency_ms >= 0.0);
}

#[tokio::test]
async fn test_paraphrase_below_threshold_is_not_selected() {
    let (engine, log) = topic_engine();

    let outcome = engine.process_transcript("god love world").await;
    assert!(outcome.report.best.is_none());
    assert!(outcome.admission.is_none());
    assert!(engine.current_state().verse.is_none());

    let top = &outcome.report.candidates[0];
    assert_eq!(top.verse.reference.book, "John");
    assert!(top.exact < 0.5);
    assert!((top.fuzzy - 0.5).abs() < 1e-9);
    assert!((top.semantic - 1.0).abs() < 1e-6);
    let expected = 0.2 * top.exact + 0.5 * top.fuzzy + 0.3 * top.semantic;
    assert!((top.fused - expected).abs() < 1e-9);
    assert!(top.fused < 0.6);

    let events = log.events();
    assert_eq!(events[0].verse_id, None);
    assert!((events[0].fused_score - top.fused).abs() < 1e-12);
}

#[tokio::test]
async fn test_search_threshold_admits_paraphrase_without_touching_session() {
    let (engine, log) = topic_engine();
    let report = engine.score_transcript("god love world", 0.3).await;
    assert!(report.semantic_used);
    assert_eq!(report.best.unwrap().verse.reference.book, "John");
    assert!(engine.current_state().verse.is_none());
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn test_embedding_failure_degrades_to_literal_scores() {
    let verses = catalog();
    let vectors = verses.iter().map(|v| topic_vector(&v.text)).collect();
    let matcher = VerseMatcher::build(verses, Some(vectors), Metric::Cosine).unwrap();
    let engine = Engine::new(
        Arc::new(test_config()),
        matcher,
        Some(Arc::new(BrokenEmbedder)),
        Arc::new(MemoryEventLog::new()),
    );

    let report = engine.score_transcript("the lord is my shepherd", 0.6).await;
    assert!(!report.semantic_used);
    let best = report.best.unwrap();
    assert_eq!(best.verse.reference.book, "Psalm");
    assert_eq!(best.semantic, 0.0);
}

#[tokio::test]
async fn test_lock_blocks_automatic_but_not_manual() {
    let (engine, log) = topic_engine();
    engine.match_transcript("For God so loved the world").await;
    let john = engine.current_state().verse.unwrap().id;

    engine.set_lock(true, None).unwrap();
    let outcome = engine.process_transcript("The Lord is my shepherd").await;
    assert!(matches!(
        outcome.admission,
        Some(Admission::Rejected(RejectReason::Locked))
    ));
    assert_eq!(engine.current_state().verse.unwrap().id, john);
    // Still scored and logged while locked.
    assert_eq!(log.events().len(), 2);
    assert!(log.events()[1].verse_id.is_some());

    let snap = engine
        .set_manual_selection(&VerseSelector::Reference(VerseRef {
            translation: "KJV".into(),
            book: "Genesis".into(),
            chapter: 1,
            verse: 1,
        }))
        .unwrap();
    assert!(snap.locked);
    assert_eq!(snap.verse.unwrap().book, "Genesis");

    engine.set_lock(false, None).unwrap();
    let outcome = engine.process_transcript("The Lord is my shepherd").await;
    assert!(matches!(outcome.admission, Some(Admission::Accepted(_))));
    assert_eq!(engine.current_state().verse.unwrap().book, "Psalm");
}

#[tokio::test]
async fn test_lock_with_pin_selects_and_broadcasts_status() {
    let (engine, _) = topic_engine();
    let mut viewer = engine.subscribe();
    let snap = engine
        .set_lock(true, Some(&VerseSelector::Id { verse_id: 2 }))
        .unwrap();
    assert!(snap.locked);
    assert_eq!(snap.verse.unwrap().id, 2);
    match viewer.try_recv() {
        Ok(StateEvent::LockStatus { locked, verse_id, .. }) => {
            assert!(locked);
            assert_eq!(verse_id, Some(2));
        }
        other => panic!("expected lock_status, got {:?}", other),
    }
    assert!(engine
        .set_lock(true, Some(&VerseSelector::Id { verse_id: 404 }))
        .is_err());
}

#[tokio::test]
async fn test_slow_match_loses_to_manual_choice_made_meanwhile() {
    let (engine, _) = build_engine(
        test_config(),
        Some(Arc::new(TopicEmbedder {
            delay: Duration::from_millis(200),
        })),
    );

    let slow = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.process_transcript("For God so loved the world").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine
        .set_manual_selection(&VerseSelector::Id { verse_id: 3 })
        .unwrap();

    let outcome = slow.await.unwrap();
    assert!(outcome.report.best.is_some());
    assert!(matches!(
        outcome.admission,
        Some(Admission::Rejected(RejectReason::Stale { .. }))
    ));
    let state = engine.current_state();
    assert_eq!(state.verse.unwrap().id, 3);
    assert_eq!(state.last_writer, Some(WriterKind::Manual));
}

#[tokio::test]
async fn test_slow_viewer_ends_with_latest_event() {
    let mut config = test_config();
    config.broadcast.queue_capacity = 4;
    let (engine, _) = build_engine(config, None);
    let mut slow = engine.subscribe();
    let mut fast = engine.subscribe();

    let mut last_seq = None;
    for i in 0..20 {
        let id = (i % 3) + 1;
        let snap = engine
            .set_manual_selection(&VerseSelector::Id { verse_id: id })
            .unwrap();
        last_seq = Some(snap.seq);
        assert!(matches!(fast.try_recv(), Ok(StateEvent::ManualVerse { .. })));
    }

    let mut drained = Vec::new();
    loop {
        match slow.try_recv() {
            Ok(ev) => drained.push(ev),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Closed) => panic!("subscription closed unexpectedly"),
        }
    }
    assert_eq!(drained.len(), 4);
    assert_eq!(slow.dropped(), 16);
    match drained.last() {
        Some(StateEvent::ManualVerse { seq, .. }) => assert_eq!(Some(*seq), last_seq),
        other => panic!("expected manual_verse, got {:?}", other),
    }
}

#[test]
fn test_concurrent_writers_publish_in_seq_order() {
    let mut config = test_config();
    config.broadcast.queue_capacity = 4096;
    let (engine, _) = build_engine(config, None);
    let mut viewer = engine.subscribe();

    let writers: Vec<_> = (0..4i64)
        .map(|w| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                for i in 0..500i64 {
                    if i % 50 == 0 {
                        engine.set_lock(i % 100 == 0, None).unwrap();
                    } else {
                        let verse_id = (w + i) % 3 + 1;
                        engine
                            .set_manual_selection(&VerseSelector::Id { verse_id })
                            .unwrap();
                    }
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    let mut seqs = Vec::new();
    while let Ok(event) = viewer.try_recv() {
        seqs.push(event.seq());
    }
    assert_eq!(viewer.dropped(), 0);
    assert_eq!(seqs.len(), 2000);
    let inversions = seqs.windows(2).filter(|p| p[0] >= p[1]).count();
    assert_eq!(inversions, 0);
    assert_eq!(seqs.last().copied(), Some(engine.current_state().seq));
}

#[tokio::test]
async fn test_concurrent_text_fragments_run_one_at_a_time() {
    let embedder = Arc::new(OverlapEmbedder::default());
    let provider: Arc<dyn EmbeddingProvider> = embedder.clone();
    let (engine, log) = build_engine(test_config(), Some(provider));
    let worker = Arc::new(FragmentWorker::spawn(engine.clone(), None));

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let worker = worker.clone();
            tokio::spawn(async move {
                worker
                    .process(Fragment::Text("For God so loved the world".into()))
                    .await
            })
        })
        .collect();
    let mut answered = 0u64;
    for call in calls {
        if call.await.unwrap().is_some() {
            answered += 1;
        }
    }

    assert_eq!(embedder.peak.load(Ordering::SeqCst), 1);
    assert!(answered >= 1);
    let stats = worker.stats();
    assert_eq!(stats.processed, answered);
    assert_eq!(stats.replaced, 8 - answered);
    assert_eq!(log.events().len() as u64, answered);
}

#[tokio::test]
async fn test_worker_coalesces_to_latest_waiting_fragment() {
    let (engine, log) = build_engine(
        test_config(),
        Some(Arc::new(TopicEmbedder {
            delay: Duration::from_millis(150),
        })),
    );
    let worker = FragmentWorker::spawn(engine.clone(), None);

    assert_eq!(
        worker.submit(Fragment::Text("In the beginning God created".into())),
        Submitted::Queued
    );
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        worker.submit(Fragment::Text("For God so loved the world".into())),
        Submitted::Queued
    );
    assert_eq!(
        worker.submit(Fragment::Text("The Lord is my shepherd".into())),
        Submitted::Replaced
    );

    let stats_before = worker.stats();
    assert_eq!(stats_before.replaced, 1);
    worker.shutdown().await;

    let transcripts: Vec<String> = log.events().into_iter().map(|e| e.transcript).collect();
    assert_eq!(
        transcripts,
        vec!["In the beginning God created", "The Lord is my shepherd"]
    );
    assert_eq!(engine.current_state().verse.unwrap().book, "Psalm");
}

#[tokio::test]
async fn test_audio_fragment_is_transcribed_and_matched() {
    let (engine, _) = build_engine(test_config(), None);
    let transcriber: Arc<dyn Transcriber> = Arc::new(ScriptedTranscriber {
        text: "the lord is my shepherd i shall not want",
        delay: Duration::from_millis(5),
    });
    let worker = FragmentWorker::spawn(engine.clone(), Some(transcriber));
    worker.submit(Fragment::Audio(AudioSegment {
        samples: vec![0.0; 16_000],
        sample_rate: 16_000,
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    worker.shutdown().await;
    assert_eq!(engine.current_state().verse.unwrap().book, "Psalm");
}

#[tokio::test]
async fn test_transcription_timeout_drops_fragment() {
    let (engine, log) = build_engine(test_config(), None);
    let transcriber: Arc<dyn Transcriber> = Arc::new(ScriptedTranscriber {
        text: "the lord is my shepherd",
        delay: Duration::from_millis(500),
    });
    let worker = FragmentWorker::spawn(engine.clone(), Some(transcriber));
    worker.submit(Fragment::Audio(AudioSegment {
        samples: vec![0.0; 1600],
        sample_rate: 16_000,
    }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = worker.stats();
    worker.shutdown().await;
    assert_eq!(stats.processed, 0);
    assert!(log.events().is_empty());
    assert!(engine.current_state().verse.is_none());
}

#[tokio::test]
async fn test_rebuild_swaps_catalog_atomically() {
    let (engine, _) = build_engine(test_config(), None);
    let before = engine.matcher();

    let mut verses = catalog();
    verses.truncate(1);
    engine.rebuild(verses, None).unwrap();

    assert_eq!(before.len(), 3);
    assert_eq!(engine.catalog_len(), 1);
    let report = engine.score_transcript("The Lord is my shepherd", 0.6).await;
    assert!(report.best.is_none());
}
