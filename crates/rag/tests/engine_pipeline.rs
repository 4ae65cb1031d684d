//! End-to-end pipeline tests with deterministic provider doubles.

use dossier_core::{AppError, AppResult, EngineConfig};
use dossier_rag::critic::Verdict;
use dossier_rag::rerank::RerankResult;
use dossier_rag::types::{Answer, AnswerRecord, Chunk, Document, RetrievalCandidate};
use dossier_rag::{
    AnswerArchive, AnswerEngine, AnswerGenerator, AnswerOptions, Citation, ChunkStore,
    CritiqueValidator, Decision, EmbeddingProvider, MemoryStore, MockProvider, Reranker,
    ScopeFilter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Drafter that replays a scripted sequence of drafts and counts calls.
struct ScriptedDrafter {
    drafts: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedDrafter {
    fn new(drafts: Vec<&str>) -> Self {
        Self {
            drafts: drafts.into_iter().map(String::from).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for ScriptedDrafter {
    async fn draft(&self, _query: &str, _candidates: &[RetrievalCandidate]) -> AppResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let draft = self.drafts.get(n).or_else(|| self.drafts.last());
        draft
            .cloned()
            .ok_or_else(|| AppError::Generation("no scripted draft".to_string()))
    }

    async fn refine(&self, query: &str, _critique: &str) -> AppResult<String> {
        Ok(format!("{} (refined)", query))
    }
}

/// Critic that replays a scripted sequence of decisions, counting calls
/// and recording the chunk ids it was shown.
struct ScriptedCritic {
    decisions: Vec<Decision>,
    calls: AtomicUsize,
    seen_chunk_ids: Mutex<Vec<String>>,
}

impl ScriptedCritic {
    fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions,
            calls: AtomicUsize::new(0),
            seen_chunk_ids: Mutex::new(Vec::new()),
        }
    }

    fn always(decision: Decision) -> Self {
        Self::new(vec![decision])
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen_chunk_ids(&self) -> Vec<String> {
        self.seen_chunk_ids.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CritiqueValidator for ScriptedCritic {
    async fn critique(
        &self,
        _query: &str,
        _draft: &str,
        _citations: &[Citation],
        candidates: &[RetrievalCandidate],
    ) -> AppResult<Verdict> {
        let mut seen = self.seen_chunk_ids.lock().unwrap();
        for candidate in candidates {
            seen.push(candidate.chunk.id.clone());
        }
        drop(seen);
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let decision = *self
            .decisions
            .get(n)
            .or_else(|| self.decisions.last())
            .unwrap_or(&Decision::Accept);
        Ok(Verdict {
            decision,
            critique: match decision {
                Decision::Accept => "ACCEPT".to_string(),
                Decision::Revise => "REVISE: needs better sourcing".to_string(),
            },
        })
    }
}

struct BrokenReranker;

#[async_trait::async_trait]
impl Reranker for BrokenReranker {
    async fn rerank(&self, _query: &str, _documents: &[String]) -> AppResult<Vec<RerankResult>> {
        Err(AppError::Retrieval("rerank service unavailable".to_string()))
    }
}

/// Reranker whose call never resolves.
struct HungReranker;

#[async_trait::async_trait]
impl Reranker for HungReranker {
    async fn rerank(&self, _query: &str, _documents: &[String]) -> AppResult<Vec<RerankResult>> {
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

/// Drafter whose first call fails with a transient error, then recovers.
struct FlakyDrafter {
    draft: String,
    calls: AtomicUsize,
}

impl FlakyDrafter {
    fn new(draft: &str) -> Self {
        Self {
            draft: draft.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for FlakyDrafter {
    async fn draft(&self, _query: &str, _candidates: &[RetrievalCandidate]) -> AppResult<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(AppError::Generation("transient 503 from provider".to_string()));
        }
        Ok(self.draft.clone())
    }

    async fn refine(&self, query: &str, _critique: &str) -> AppResult<String> {
        Ok(query.to_string())
    }
}

/// Drafter whose first call stalls past the per-call timeout, then recovers.
struct StallOnceDrafter {
    draft: String,
    calls: AtomicUsize,
}

impl StallOnceDrafter {
    fn new(draft: &str) -> Self {
        Self {
            draft: draft.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for StallOnceDrafter {
    async fn draft(&self, _query: &str, _candidates: &[RetrievalCandidate]) -> AppResult<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }
        Ok(self.draft.clone())
    }

    async fn refine(&self, query: &str, _critique: &str) -> AppResult<String> {
        Ok(query.to_string())
    }
}

/// Drafter that records the query of every draft call and cannot refine.
struct RefineOutageDrafter {
    draft: String,
    queries: Mutex<Vec<String>>,
}

impl RefineOutageDrafter {
    fn new(draft: &str) -> Self {
        Self {
            draft: draft.to_string(),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn draft_queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for RefineOutageDrafter {
    async fn draft(&self, query: &str, _candidates: &[RetrievalCandidate]) -> AppResult<String> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.draft.clone())
    }

    async fn refine(&self, _query: &str, _critique: &str) -> AppResult<String> {
        Err(AppError::Generation("refinement service down".to_string()))
    }
}

/// In-memory archive double.
#[derive(Default)]
struct MemoryArchive {
    records: Mutex<Vec<AnswerRecord>>,
}

#[async_trait::async_trait]
impl AnswerArchive for MemoryArchive {
    async fn record(&self, record: &AnswerRecord) -> AppResult<()> {
        self.records
            .lock()
            .map_err(|_| AppError::Store("poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }

    async fn list(&self, limit: usize) -> AppResult<Vec<AnswerRecord>> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Store("poisoned".to_string()))?
            .clone();
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    async fn count(&self) -> AppResult<u64> {
        Ok(self
            .records
            .lock()
            .map_err(|_| AppError::Store("poisoned".to_string()))?
            .len() as u64)
    }
}

/// Seed a store with the three-chunk decision-date corpus.
async fn seeded_store(provider: &MockProvider) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let texts = [
        ("c0", 1, None, "The case concerns an administrative appeal."),
        ("c1", 2, Some("Decision"), "Decision date: March 15, 2025."),
        ("c2", 3, None, "The appellant may contest within two months."),
    ];

    let mut chunks = Vec::new();
    for (i, (id, page, section, text)) in texts.iter().enumerate() {
        let embedding = provider.embed(text).await.unwrap();
        chunks.push(Chunk {
            id: id.to_string(),
            document_id: "case-42".to_string(),
            document_version: 1,
            position: i as u32,
            page: *page,
            section: section.map(String::from),
            text: text.to_string(),
            embedding: Some(embedding),
        });
    }

    store
        .upsert_document(
            &Document {
                id: "case-42".to_string(),
                text: String::new(),
                page_count: 3,
                version: 1,
            },
            chunks,
        )
        .await
        .unwrap();
    store
}

fn engine_with(
    store: Arc<MemoryStore>,
    reranker: Option<Arc<dyn Reranker>>,
    drafter: Arc<ScriptedDrafter>,
    critic: Arc<ScriptedCritic>,
    archive: Option<Arc<dyn AnswerArchive>>,
) -> AnswerEngine {
    AnswerEngine::new(
        Arc::new(MockProvider::new(64)),
        store,
        reranker,
        drafter,
        critic,
        archive,
        EngineConfig::default(),
    )
}

async fn ask(engine: &AnswerEngine, query: &str) -> Answer {
    engine
        .answer_query(query, AnswerOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn decision_date_answer_cites_the_decision_chunk() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(ScriptedDrafter::new(vec![
        "The decision date is March 15, 2025 [c1, Page 2, Section: Decision].",
    ]));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let engine = engine_with(store, None, drafter, critic, None);

    let answer = ask(&engine, "What is the decision date?").await;

    assert_eq!(answer.citations.len(), 1);
    assert_eq!(
        answer.citations[0],
        Citation {
            chunk_id: "c1".to_string(),
            page: 2,
            section: Some("Decision".to_string()),
        }
    );
    assert_eq!(answer.revision_count, 0);
    assert!(!answer.degraded_confidence);
    assert_eq!(answer.retrieved_count, 3);
}

#[tokio::test]
async fn out_of_set_citation_revises_once_without_critique() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(ScriptedDrafter::new(vec![
        "The date is in the file [ghost-chunk, Page 9].",
        "The decision date is March 15, 2025 [c1, Page 2].",
    ]));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let engine = engine_with(store, None, drafter.clone(), critic.clone(), None);

    let answer = ask(&engine, "What is the decision date?").await;

    // The bad draft spends a revision but never reaches the critic.
    assert_eq!(answer.revision_count, 1);
    assert_eq!(drafter.call_count(), 2);
    assert_eq!(critic.call_count(), 1);
    assert_eq!(answer.citations[0].chunk_id, "c1");
    assert!(!answer.degraded_confidence);
}

#[tokio::test]
async fn persistent_revise_verdicts_force_degraded_accept() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(ScriptedDrafter::new(vec![
        "The decision date is March 15, 2025 [c1, Page 2].",
    ]));
    let critic = Arc::new(ScriptedCritic::always(Decision::Revise));
    let engine = engine_with(store, None, drafter.clone(), critic.clone(), None);

    let answer = ask(&engine, "What is the decision date?").await;

    assert!(answer.degraded_confidence);
    assert_eq!(answer.revision_count, 3);
    // Three revise verdicts plus the final one that hits the budget.
    assert_eq!(critic.call_count(), 4);
    assert_eq!(answer.citations[0].chunk_id, "c1");
}

#[tokio::test]
async fn rerank_outage_degrades_silently() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(ScriptedDrafter::new(vec![
        "The decision date is March 15, 2025 [c1, Page 2].",
    ]));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let engine = engine_with(store, Some(Arc::new(BrokenReranker)), drafter, critic, None);

    let answer = ask(&engine, "What is the decision date?").await;

    // Fallback ordering still produces a full, non-degraded answer.
    assert!(!answer.degraded_confidence);
    assert_eq!(answer.retrieved_count, 3);
    assert_eq!(answer.citations[0].chunk_id, "c1");
}

#[tokio::test]
async fn empty_scope_short_circuits_without_error() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(ScriptedDrafter::new(vec!["never used"]));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let engine = engine_with(store, None, drafter.clone(), critic.clone(), None);

    let options = AnswerOptions {
        scope: ScopeFilter::documents(vec!["no-such-case".to_string()]),
        ..AnswerOptions::default()
    };
    let answer = engine
        .answer_query("What is the decision date?", options)
        .await
        .unwrap();

    assert!(answer.citations.is_empty());
    assert_eq!(answer.retrieved_count, 0);
    assert_eq!(answer.revision_count, 0);
    assert_eq!(drafter.call_count(), 0);
    assert_eq!(critic.call_count(), 0);
}

#[tokio::test]
async fn completed_runs_are_archived_with_chunk_union() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(ScriptedDrafter::new(vec![
        "The decision date is March 15, 2025 [c1, Page 2].",
    ]));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let archive = Arc::new(MemoryArchive::default());
    let engine = engine_with(
        store,
        None,
        drafter,
        critic,
        Some(archive.clone() as Arc<dyn AnswerArchive>),
    );

    ask(&engine, "What is the decision date?").await;

    assert_eq!(archive.count().await.unwrap(), 1);
    let records = archive.list(1).await.unwrap();
    assert_eq!(records[0].query, "What is the decision date?");
    let mut ids = records[0].retrieved_chunk_ids.clone();
    ids.sort();
    assert_eq!(ids, vec!["c0", "c1", "c2"]);
    assert_eq!(records[0].citations[0].chunk_id, "c1");
}

#[tokio::test]
async fn critique_receives_the_candidate_chunks() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(ScriptedDrafter::new(vec![
        "The decision date is March 15, 2025 [c1, Page 2].",
    ]));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let engine = engine_with(store, None, drafter, critic.clone(), None);

    ask(&engine, "What is the decision date?").await;

    // The critic judges the draft against the same chunks it was drafted from.
    let mut seen = critic.seen_chunk_ids();
    seen.sort();
    assert_eq!(seen, vec!["c0", "c1", "c2"]);
}

#[tokio::test]
async fn transient_draft_error_is_retried() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(FlakyDrafter::new(
        "The decision date is March 15, 2025 [c1, Page 2].",
    ));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let engine = AnswerEngine::new(
        Arc::new(MockProvider::new(64)),
        store,
        None,
        drafter.clone(),
        critic,
        None,
        EngineConfig::default(),
    );

    let answer = ask(&engine, "What is the decision date?").await;

    // One transient failure costs a retry, not the run.
    assert_eq!(drafter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(answer.revision_count, 0);
    assert_eq!(answer.citations[0].chunk_id, "c1");
}

#[tokio::test]
async fn draft_timeout_retries_like_transport_error() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(StallOnceDrafter::new(
        "The decision date is March 15, 2025 [c1, Page 2].",
    ));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let config = EngineConfig {
        call_timeout_secs: 1,
        max_retries: 2,
        ..EngineConfig::default()
    };
    let engine = AnswerEngine::new(
        Arc::new(MockProvider::new(64)),
        store,
        None,
        drafter.clone(),
        critic,
        None,
        config,
    );

    let answer = ask(&engine, "What is the decision date?").await;

    assert_eq!(drafter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(answer.citations[0].chunk_id, "c1");
    assert!(!answer.degraded_confidence);
}

#[tokio::test]
async fn hung_reranker_falls_back_within_timeout() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(ScriptedDrafter::new(vec![
        "The decision date is March 15, 2025 [c1, Page 2].",
    ]));
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let config = EngineConfig {
        call_timeout_secs: 1,
        ..EngineConfig::default()
    };
    let engine = AnswerEngine::new(
        Arc::new(MockProvider::new(64)),
        store,
        Some(Arc::new(HungReranker)),
        drafter,
        critic,
        None,
        config,
    );

    let answer = ask(&engine, "What is the decision date?").await;

    assert!(!answer.degraded_confidence);
    assert_eq!(answer.retrieved_count, 3);
    assert_eq!(answer.citations[0].chunk_id, "c1");
}

#[tokio::test]
async fn refinement_outage_rewrites_the_query_locally() {
    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let drafter = Arc::new(RefineOutageDrafter::new(
        "The decision date is March 15, 2025 [c1, Page 2].",
    ));
    let critic = Arc::new(ScriptedCritic::new(vec![Decision::Revise, Decision::Accept]));
    let engine = AnswerEngine::new(
        Arc::new(MockProvider::new(64)),
        store,
        None,
        drafter.clone(),
        critic,
        None,
        EngineConfig {
            max_retries: 1,
            ..EngineConfig::default()
        },
    );

    let answer = ask(&engine, "What is the decision date?").await;

    assert_eq!(answer.revision_count, 1);
    let queries = drafter.draft_queries();
    assert_eq!(queries.len(), 2);
    // The fallback rewrite still derives the revised query from the critique.
    assert!(queries[1].starts_with("What is the decision date?"));
    assert!(queries[1].contains("needs better sourcing"));
}

#[tokio::test]
async fn deadline_expiry_cancels_the_run() {
    struct StalledDrafter;

    #[async_trait::async_trait]
    impl AnswerGenerator for StalledDrafter {
        async fn draft(
            &self,
            _query: &str,
            _candidates: &[RetrievalCandidate],
        ) -> AppResult<String> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(String::new())
        }

        async fn refine(&self, query: &str, _critique: &str) -> AppResult<String> {
            Ok(query.to_string())
        }
    }

    let provider = MockProvider::new(64);
    let store = seeded_store(&provider).await;
    let critic = Arc::new(ScriptedCritic::always(Decision::Accept));
    let engine = AnswerEngine::new(
        Arc::new(MockProvider::new(64)),
        store,
        None,
        Arc::new(StalledDrafter),
        critic,
        None,
        EngineConfig::default(),
    );

    let options = AnswerOptions {
        deadline: Some(std::time::Duration::from_millis(50)),
        ..AnswerOptions::default()
    };
    let err = engine
        .answer_query("What is the decision date?", options)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled(_)));
}
