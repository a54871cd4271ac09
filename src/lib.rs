//! acolyte-rag - 컬렉션 기반 RAG 질의 서비스
//!
//! 미리 구축된 LanceDB 컬렉션 인덱스와 세션별 대화 기록을 바탕으로
//! 질문을 분류하고 알맞은 프롬프트 체인으로 답변을 생성합니다.

pub mod chains;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod knowledge;
pub mod orchestrator;
pub mod server;
pub mod session;

// Re-exports
pub use chains::{MapReduceSummarizer, PromptChain, FALLBACK_ANSWER};
pub use classifier::{keyword_route, ClassificationDecision, QueryClassifier, QueryRoute, Scope};
pub use config::ServiceConfig;
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use error::{RagError, RagResult};
pub use generation::{GeminiGeneration, GenerationConfig, GenerationProvider};
pub use knowledge::{
    ChunkConfig, Chunker, CollectionIndex, InMemoryCollection, IndexHandle, IndexLoader,
    IndexStore, LanceCollection, LanceIndexLoader, RetrievedPassage, WindowChunker,
};
pub use orchestrator::{QueryOrchestrator, QueryOutcome, QueryRequest};
pub use server::{create_router, AppState};
pub use session::{Interaction, SessionStore, MAX_INTERACTIONS};
