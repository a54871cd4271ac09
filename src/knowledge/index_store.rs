//! Index Store - 컬렉션별 벡터 인덱스 캐시
//!
//! 컬렉션 ID마다 최대 한 번만 로드합니다. 같은 ID에 대한 동시 첫 요청은
//! 하나의 로드를 함께 기다리고(single-flight), 로드가 실패하면 캐시에
//! 아무것도 남기지 않아 다음 요청이 다시 시도합니다.
//!
//! 로드된 인덱스는 프로세스 수명 동안 유지됩니다 (축출 없음).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};

use super::vector::{CollectionIndex, RetrievedPassage};

// ============================================================================
// IndexLoader Trait
// ============================================================================

/// 컬렉션 ID로 인덱스를 여는 로더 (저장 형식은 구현체가 결정)
#[async_trait]
pub trait IndexLoader: Send + Sync {
    async fn load(&self, collection_id: &str) -> Result<Arc<dyn CollectionIndex>>;
}

// ============================================================================
// IndexHandle
// ============================================================================

/// 로드된 컬렉션 핸들 (Arc 복제)
#[derive(Clone)]
pub struct IndexHandle {
    collection_id: Arc<str>,
    index: Arc<dyn CollectionIndex>,
}

impl IndexHandle {
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn index(&self) -> &Arc<dyn CollectionIndex> {
        &self.index
    }

    /// 같은 인덱스 인스턴스인지 여부
    pub fn ptr_eq(&self, other: &IndexHandle) -> bool {
        Arc::ptr_eq(&self.index, &other.index)
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("collection_id", &self.collection_id)
            .field("dimension", &self.index.dimension())
            .finish()
    }
}

// ============================================================================
// IndexStore
// ============================================================================

type Slot = Arc<OnceCell<IndexHandle>>;

/// 벡터 인덱스 저장소
///
/// 오케스트레이터에 주입되는 소유 저장소입니다.
pub struct IndexStore {
    loader: Arc<dyn IndexLoader>,
    embedder: Arc<dyn EmbeddingProvider>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl IndexStore {
    pub fn new(loader: Arc<dyn IndexLoader>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            loader,
            embedder,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// 캐시된 인덱스 반환, 없으면 로드 후 캐시
    pub async fn get_or_load(&self, collection_id: &str) -> RagResult<IndexHandle> {
        validate_collection_id(collection_id)?;

        let slot = self.slot(collection_id);

        if let Some(handle) = slot.get() {
            tracing::debug!(collection_id, "Vector index cache hit");
            return Ok(handle.clone());
        }

        let result = slot
            .get_or_try_init(|| async {
                let index = self.loader.load(collection_id).await.map_err(|source| {
                    tracing::error!(collection_id, error = %source, "Vector index load failed");
                    RagError::IndexLoad {
                        collection_id: collection_id.to_string(),
                        source,
                    }
                })?;

                tracing::info!(collection_id, "Vector index loaded and cached");
                Ok::<_, RagError>(IndexHandle {
                    collection_id: Arc::from(collection_id),
                    index,
                })
            })
            .await
            .cloned();

        if result.is_err() {
            self.release_failed_slot(collection_id, slot);
        }

        result
    }

    /// 유사도 검색
    ///
    /// 질의가 비어 있으면 "전체 패시지" 요청으로 보고 임베딩 없이 scan합니다.
    /// k는 항상 인덱스 크기로 제한됩니다.
    pub async fn similarity_search(
        &self,
        handle: &IndexHandle,
        query: &str,
        k: usize,
    ) -> RagResult<Vec<RetrievedPassage>> {
        let index = handle.index();
        let total = index
            .count()
            .await
            .map_err(|e| RagError::provider("Failed to count passages", e))?;
        let limit = k.min(total);

        let passages = if query.trim().is_empty() {
            index
                .scan(limit)
                .await
                .map_err(|e| RagError::provider("Passage scan failed", e))?
        } else {
            let embedding = self
                .embedder
                .embed(query)
                .await
                .map_err(|e| RagError::provider("Query embedding failed", e))?;
            index
                .search(&embedding, limit)
                .await
                .map_err(|e| RagError::provider("Vector search failed", e))?
        };

        tracing::debug!(
            collection_id = handle.collection_id(),
            requested = k,
            limit,
            returned = passages.len(),
            "Similarity search completed"
        );

        Ok(passages)
    }

    /// 로드 완료된 컬렉션 수
    pub fn cached_count(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|s| s.initialized()).count())
            .unwrap_or(0)
    }

    /// 실패한 로드의 빈 슬롯 제거
    ///
    /// 같은 슬롯을 잡고 있는 다른 요청이 있으면 남겨 두고, 마지막 요청이 제거합니다.
    fn release_failed_slot(&self, collection_id: &str, slot: Slot) {
        // 자기 참조를 먼저 놓아야 맵 참조만 남았는지 셀 수 있음
        let failed = Arc::downgrade(&slot);
        drop(slot);

        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let removable = slots.get(collection_id).is_some_and(|current| {
            std::ptr::eq(Arc::as_ptr(current), failed.as_ptr())
                && !current.initialized()
                && Arc::strong_count(current) == 1
        });
        if removable {
            slots.remove(collection_id);
            tracing::debug!(collection_id, "Released slot of failed load");
        }
    }

    fn slot(&self, collection_id: &str) -> Slot {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry(collection_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

/// 컬렉션 ID 검증
///
/// ID는 인덱스 루트 아래 단일 경로 요소로 쓰이므로 구분자나 상위 경로를 허용하지 않습니다.
pub fn validate_collection_id(collection_id: &str) -> RagResult<()> {
    let invalid = collection_id.trim().is_empty()
        || collection_id.starts_with('.')
        || collection_id.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
        || collection_id.contains("..");

    if invalid {
        return Err(RagError::Validation(format!(
            "Invalid collectionId: {:?}",
            collection_id
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector::InMemoryCollection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("beta") {
                Ok(vec![0.0, 1.0])
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
        fn dimension(&self) -> usize {
            2
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// 로드 횟수를 세고, `fail_first`면 첫 로드를 실패시키는 로더
    struct CountingLoader {
        loads: AtomicUsize,
        fail_first: bool,
    }

    impl CountingLoader {
        fn new(fail_first: bool) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl IndexLoader for CountingLoader {
        async fn load(&self, collection_id: &str) -> Result<Arc<dyn CollectionIndex>> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                anyhow::bail!("corrupt index for {}", collection_id);
            }
            let rows = (0..8)
                .map(|i| {
                    let e = if i % 2 == 0 { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
                    (format!("{}-{}", if i % 2 == 0 { "alpha" } else { "beta" }, i), e)
                })
                .collect();
            Ok(Arc::new(InMemoryCollection::new(2, rows)?))
        }
    }

    fn store(loader: Arc<CountingLoader>) -> IndexStore {
        IndexStore::new(loader, Arc::new(FixedEmbedder))
    }

    #[tokio::test]
    async fn test_repeated_calls_return_same_instance() {
        let loader = Arc::new(CountingLoader::new(false));
        let store = store(loader.clone());

        let first = store.get_or_load("docs").await.unwrap();
        let second = store.get_or_load("docs").await.unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_load_is_single_flight() {
        let loader = Arc::new(CountingLoader::new(false));
        let store = Arc::new(store(loader.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get_or_load("docs").await.unwrap()
            }));
        }

        let mut loaded = Vec::new();
        for h in handles {
            loaded.push(h.await.unwrap());
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(loaded.windows(2).all(|w| w[0].ptr_eq(&w[1])));
    }

    #[tokio::test]
    async fn test_failed_load_does_not_poison_cache() {
        let loader = Arc::new(CountingLoader::new(true));
        let store = store(loader.clone());

        let err = store.get_or_load("docs").await.unwrap_err();
        assert!(matches!(err, RagError::IndexLoad { .. }));
        assert_eq!(store.cached_count(), 0);

        let handle = store.get_or_load("docs").await.unwrap();
        assert_eq!(handle.collection_id(), "docs");
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    /// 존재하지 않는 컬렉션만 로드하는 로더
    struct MissingLoader;

    #[async_trait]
    impl IndexLoader for MissingLoader {
        async fn load(&self, collection_id: &str) -> Result<Arc<dyn CollectionIndex>> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            anyhow::bail!("collection {} not found", collection_id)
        }
    }

    fn slot_count(store: &IndexStore) -> usize {
        store.slots.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_failed_loads_leave_no_slots_behind() {
        let store = Arc::new(IndexStore::new(Arc::new(MissingLoader), Arc::new(FixedEmbedder)));

        for i in 0..200 {
            assert!(store.get_or_load(&format!("unknown{i}")).await.is_err());
        }
        assert_eq!(slot_count(&store), 0);

        // 같은 ID를 동시에 기다리던 요청이 모두 실패해도 슬롯은 남지 않음
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get_or_load("shared-missing").await.is_err()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(slot_count(&store), 0);
        assert_eq!(store.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_collection_id_rejected_without_load() {
        let loader = Arc::new(CountingLoader::new(false));
        let store = store(loader.clone());

        for id in ["", "../etc", "a/b", ".hidden", "a\\b"] {
            let err = store.get_or_load(id).await.unwrap_err();
            assert!(err.is_client_error(), "{id:?} should be rejected");
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_similarity_search_top_k() {
        let store = store(Arc::new(CountingLoader::new(false)));
        let handle = store.get_or_load("docs").await.unwrap();

        let hits = store.similarity_search(&handle, "beta?", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|p| p.content.starts_with("beta")));
    }

    #[tokio::test]
    async fn test_empty_query_returns_all_capped_to_index_size() {
        let store = store(Arc::new(CountingLoader::new(false)));
        let handle = store.get_or_load("docs").await.unwrap();

        let all = store.similarity_search(&handle, "", 2000).await.unwrap();
        assert_eq!(all.len(), 8);
        assert_eq!(all[0].content, "alpha-0");
    }
}
