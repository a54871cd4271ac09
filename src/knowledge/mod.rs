//! Knowledge 모듈 - 컬렉션 벡터 인덱스
//!
//! - Vector: 검색 트레이트, 패시지 타입, 메모리 내 컬렉션
//! - Lance: 미리 구축된 LanceDB 컬렉션 로더
//! - IndexStore: 컬렉션별 single-flight 로드 캐시
//! - Chunker: map-reduce 요약용 오버랩 윈도우 분할

mod chunker;
mod index_store;
mod lance;
mod vector;

// Re-exports
pub use chunker::{ChunkConfig, Chunker, WindowChunker};
pub use index_store::{validate_collection_id, IndexHandle, IndexLoader, IndexStore};
pub use lance::{LanceCollection, LanceIndexLoader, CONTENT_COLUMN, EMBEDDING_COLUMN, TABLE_NAME};
pub use vector::{cosine_similarity, join_passages, CollectionIndex, InMemoryCollection, RetrievedPassage};
