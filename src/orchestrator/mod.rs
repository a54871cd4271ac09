//! 질의 오케스트레이터
//!
//! 요청 하나의 처리 흐름:
//! 1. 필수 필드 검증
//! 2. 컬렉션 인덱스 조회 (캐시 또는 로드)
//! 3. 세션 잠금 및 대화 기록 조회
//! 4. 경로 결정 (요약 키워드 > 모델 분류) 후 체인 실행
//! 5. 성공 시 (질문, 답변)을 세션에 추가
//!
//! 전체 처리는 요청 제한 시간 안에서 실행되며, 시간 초과 시 세션은 변경되지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::chains::{
    answer_from_context, full_answer, summarize_interactions, MapReduceSummarizer,
};
use crate::classifier::{keyword_route, QueryClassifier, QueryRoute};
use crate::error::{RagError, RagResult};
use crate::generation::GenerationProvider;
use crate::knowledge::{join_passages, ChunkConfig, IndexHandle, IndexStore};
use crate::session::{Interaction, SessionStore};

/// 요약 및 전체 답변 경로의 검색 개수 (사실상 전체 패시지)
pub const LARGE_K: usize = 2000;
/// 부분 답변 경로의 검색 개수
pub const PARTIAL_K: usize = 5;
/// 빈 검색어 = 저장 순서대로 전체 패시지
const ALL_PASSAGES: &str = "";
/// 기본 요청 제한 시간
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Request / Outcome
// ============================================================================

/// 질의 요청 (JSON: collectionId, query, sessionId)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl QueryRequest {
    pub fn new(
        collection_id: impl Into<String>,
        query: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            collection_id: Some(collection_id.into()),
            query: Some(query.into()),
            session_id: Some(session_id.into()),
        }
    }

    /// 필수 필드 검증 (공백만 있는 값도 누락으로 처리)
    ///
    /// 성공 시 (collection_id, query, session_id)를 반환합니다.
    pub fn validate(&self) -> RagResult<(&str, &str, &str)> {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.trim().is_empty())
        }

        let collection_id = present(&self.collection_id);
        let query = present(&self.query);
        let session_id = present(&self.session_id);

        match (collection_id, query, session_id) {
            (Some(c), Some(q), Some(s)) => Ok((c, q, s)),
            _ => {
                let missing: Vec<&str> = [
                    ("collectionId", collection_id.is_none()),
                    ("query", query.is_none()),
                    ("sessionId", session_id.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();

                Err(RagError::Validation(format!(
                    "collectionId, query, and sessionId are required (missing: {})",
                    missing.join(", ")
                )))
            }
        }
    }
}

/// 처리 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub route: QueryRoute,
}

// ============================================================================
// QueryOrchestrator
// ============================================================================

/// 질의 오케스트레이터
///
/// 인덱스 저장소와 세션 저장소는 외부에서 주입되며 서버 상태와 공유됩니다.
pub struct QueryOrchestrator {
    indexes: Arc<IndexStore>,
    sessions: Arc<SessionStore>,
    classifier: QueryClassifier,
    generator: Arc<dyn GenerationProvider>,
    summarizer: MapReduceSummarizer,
    request_timeout: Duration,
}

impl QueryOrchestrator {
    pub fn new(
        indexes: Arc<IndexStore>,
        sessions: Arc<SessionStore>,
        generator: Arc<dyn GenerationProvider>,
        chunk: ChunkConfig,
    ) -> Self {
        Self {
            indexes,
            sessions,
            classifier: QueryClassifier::new(generator.clone()),
            generator,
            summarizer: MapReduceSummarizer::new(chunk),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn indexes(&self) -> &Arc<IndexStore> {
        &self.indexes
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// 질의 처리
    pub async fn answer(&self, request: &QueryRequest) -> RagResult<QueryOutcome> {
        let (collection_id, question, session_id) = request.validate()?;

        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "query",
            %request_id,
            collection_id,
            session_id
        );

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.request_timeout,
            self.process(collection_id, question, session_id)
                .instrument(span.clone()),
        )
        .await
        .map_err(|_| RagError::Timeout(self.request_timeout))
        .and_then(|r| r);

        let _entered = span.enter();
        match &result {
            Ok(outcome) => tracing::info!(
                route = %outcome.route,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Query answered"
            ),
            Err(e) => tracing::error!(
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Query failed"
            ),
        }

        result
    }

    async fn process(
        &self,
        collection_id: &str,
        question: &str,
        session_id: &str,
    ) -> RagResult<QueryOutcome> {
        let handle = self.indexes.get_or_load(collection_id).await?;

        // 세션 잠금은 답변 추가까지 유지
        let mut session = self.sessions.lock(session_id).await;
        let history = session.format_for_prompt();

        let route = self.route(question).await?;
        tracing::info!(%route, history_len = session.len(), "Dispatching query");

        let answer = self.dispatch(route, &handle, question, &history).await?;

        session.append(Interaction::new(question, answer.clone()));

        Ok(QueryOutcome { answer, route })
    }

    /// 경로 결정 (요약 키워드가 모델 분류보다 우선)
    async fn route(&self, question: &str) -> RagResult<QueryRoute> {
        if let Some(route) = keyword_route(question) {
            return Ok(route);
        }

        let decision = self
            .classifier
            .classify(question)
            .await
            .map_err(|e| RagError::provider("Query classification failed", e))?;

        Ok(decision.scope.into())
    }

    async fn dispatch(
        &self,
        route: QueryRoute,
        handle: &IndexHandle,
        question: &str,
        history: &str,
    ) -> RagResult<String> {
        let generator = self.generator.as_ref();

        let result = match route {
            QueryRoute::InteractionSummary => summarize_interactions(generator, history).await,
            QueryRoute::DocumentSummary => {
                let content = self.retrieve(handle, ALL_PASSAGES, LARGE_K).await?;
                self.summarizer.summarize(generator, &content).await
            }
            QueryRoute::FullAnswer => {
                let content = self.retrieve(handle, ALL_PASSAGES, LARGE_K).await?;
                full_answer(generator, &self.summarizer, &content, history, question).await
            }
            QueryRoute::PartialAnswer => {
                let content = self.retrieve(handle, question, PARTIAL_K).await?;
                answer_from_context(generator, &content, history, question).await
            }
        };

        result.map_err(|e| RagError::provider("Answer generation failed", e))
    }

    async fn retrieve(&self, handle: &IndexHandle, query: &str, k: usize) -> RagResult<String> {
        let passages = self.indexes.similarity_search(handle, query, k).await?;
        tracing::debug!(k, retrieved = passages.len(), "Passages retrieved");
        Ok(join_passages(&passages))
    }
}

// ============================================================================
// Tests
// ============================================================================
