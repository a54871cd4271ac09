//! Vector Index - 컬렉션 검색 트레이트 및 유틸리티
//!
//! 컬렉션 인덱스는 미리 구축된 것을 읽기 전용으로 사용합니다.

use anyhow::Result;
use async_trait::async_trait;

// ============================================================================
// Types
// ============================================================================

/// 검색된 패시지
///
/// 순위는 반환된 Vec에서의 위치로 표현됩니다.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    /// 패시지 텍스트
    pub content: String,
    /// 유사도 스코어 (scan 결과는 0.0)
    pub similarity: f32,
}

// ============================================================================
// CollectionIndex Trait
// ============================================================================

/// 컬렉션 인덱스 트레이트 (async, 읽기 전용)
#[async_trait]
pub trait CollectionIndex: Send + Sync {
    /// 벡터 유사도 검색 (유사도 내림차순)
    async fn search(&self, query_embedding: &[f32], limit: usize)
        -> Result<Vec<RetrievedPassage>>;

    /// 저장 순서대로 패시지 조회 (빈 질의용)
    async fn scan(&self, limit: usize) -> Result<Vec<RetrievedPassage>>;

    /// 패시지 개수
    async fn count(&self) -> Result<usize>;

    /// 임베딩 차원
    fn dimension(&self) -> usize;
}

// ============================================================================
// InMemoryCollection
// ============================================================================

/// 메모리 내 컬렉션 (전수 코사인 유사도)
///
/// 작은 픽스처나 테스트용입니다.
#[derive(Debug, Clone)]
pub struct InMemoryCollection {
    dimension: usize,
    rows: Vec<(String, Vec<f32>)>,
}

impl InMemoryCollection {
    /// (content, embedding) 행으로 생성
    ///
    /// 모든 임베딩의 차원이 같아야 합니다.
    pub fn new(dimension: usize, rows: Vec<(String, Vec<f32>)>) -> Result<Self> {
        if let Some((content, embedding)) = rows.iter().find(|(_, e)| e.len() != dimension) {
            anyhow::bail!(
                "Embedding for passage {:?} has dimension {}, expected {}",
                content.chars().take(40).collect::<String>(),
                embedding.len(),
                dimension
            );
        }
        Ok(Self { dimension, rows })
    }
}

#[async_trait]
impl CollectionIndex for InMemoryCollection {
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        let mut scored: Vec<RetrievedPassage> = self
            .rows
            .iter()
            .map(|(content, embedding)| RetrievedPassage {
                content: content.clone(),
                similarity: cosine_similarity(query_embedding, embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn scan(&self, limit: usize) -> Result<Vec<RetrievedPassage>> {
        Ok(self
            .rows
            .iter()
            .take(limit)
            .map(|(content, _)| RetrievedPassage {
                content: content.clone(),
                similarity: 0.0,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 패시지 본문을 빈 줄로 이어 붙임
pub fn join_passages(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> InMemoryCollection {
        InMemoryCollection::new(
            3,
            vec![
                ("alpha".to_string(), vec![1.0, 0.0, 0.0]),
                ("beta".to_string(), vec![0.0, 1.0, 0.0]),
                ("gamma".to_string(), vec![0.7, 0.7, 0.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched_or_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_in_memory_rejects_wrong_dimension() {
        let result = InMemoryCollection::new(2, vec![("x".to_string(), vec![1.0, 0.0, 0.0])]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_search_ranks_by_similarity() {
        let collection = fixture();
        let results = collection.search(&[1.0, 0.1, 0.0], 2).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "alpha");
        assert_eq!(results[1].content, "gamma");
        assert!(results[0].similarity >= results[1].similarity);
    }

    #[tokio::test]
    async fn test_in_memory_scan_keeps_storage_order() {
        let collection = fixture();
        let results = collection.scan(10).await.unwrap();
        let contents: Vec<&str> = results.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(contents, vec!["alpha", "beta", "gamma"]);
        assert_eq!(collection.count().await.unwrap(), 3);
    }

    #[test]
    fn test_join_passages() {
        let passages = vec![
            RetrievedPassage {
                content: "one".into(),
                similarity: 0.9,
            },
            RetrievedPassage {
                content: "two".into(),
                similarity: 0.5,
            },
        ];
        assert_eq!(join_passages(&passages), "one\n\ntwo");
        assert_eq!(join_passages(&[]), "");
    }
}
