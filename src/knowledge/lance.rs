//! LanceDB Collection - 미리 구축된 컬렉션 인덱스 로더
//!
//! 저장 규칙: `<index_root>/<collection_id>/` 디렉토리가 LanceDB 데이터베이스이며
//! `passages` 테이블에 `content`(Utf8)와 `embedding`(FixedSizeList<Float32, D>) 컬럼이 있습니다.
//! 인덱스 구축은 이 서비스의 범위 밖이므로 여기서는 열기와 검색만 합니다.
//!
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Array, Float32Array, RecordBatch, StringArray};
use arrow_schema::DataType;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;

use super::index_store::IndexLoader;
use super::vector::{CollectionIndex, RetrievedPassage};

/// 패시지 테이블 이름
pub const TABLE_NAME: &str = "passages";
/// 본문 컬럼
pub const CONTENT_COLUMN: &str = "content";
/// 임베딩 컬럼
pub const EMBEDDING_COLUMN: &str = "embedding";

// ============================================================================
// LanceCollection
// ============================================================================

/// LanceDB 컬렉션 인덱스
///
/// 열린 테이블 핸들을 보관하며 이후 변경되지 않습니다.
pub struct LanceCollection {
    table: Table,
    dimension: usize,
}

impl LanceCollection {
    /// 기존 컬렉션 열기
    ///
    /// # Arguments
    /// * `path` - 컬렉션 디렉토리 (LanceDB 데이터베이스)
    /// * `expected_dimension` - 질의 임베딩 차원 (인덱스와 같아야 함)
    pub async fn open(path: &Path, expected_dimension: usize) -> Result<Self> {
        if !path.is_dir() {
            anyhow::bail!("Index directory not found: {}", path.display());
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let names = db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        if !names.iter().any(|n| n == TABLE_NAME) {
            anyhow::bail!(
                "Table '{}' not found in {} (found: {:?})",
                TABLE_NAME,
                path.display(),
                names
            );
        }

        let table = db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open passages table")?;

        let schema = table.schema().await.context("Failed to read table schema")?;

        // 패시지 디코딩은 Utf8 문자열 컬럼만 지원
        match schema.field_with_name(CONTENT_COLUMN).map(|f| f.data_type()) {
            Ok(DataType::Utf8) => {}
            Ok(other) => anyhow::bail!(
                "Column '{}' has unsupported type {:?}",
                CONTENT_COLUMN,
                other
            ),
            Err(_) => anyhow::bail!("Missing '{}' column", CONTENT_COLUMN),
        }

        let dimension = match schema.field_with_name(EMBEDDING_COLUMN).map(|f| f.data_type()) {
            Ok(DataType::FixedSizeList(_, size)) => *size as usize,
            Ok(other) => anyhow::bail!(
                "Column '{}' has unsupported type {:?}",
                EMBEDDING_COLUMN,
                other
            ),
            Err(_) => anyhow::bail!("Missing '{}' column", EMBEDDING_COLUMN),
        };

        if dimension != expected_dimension {
            anyhow::bail!(
                "Index dimension {} does not match embedding dimension {}",
                dimension,
                expected_dimension
            );
        }

        Ok(Self { table, dimension })
    }

    /// RecordBatch에서 패시지 추출
    ///
    /// `_distance` 컬럼(벡터 검색 시 LanceDB가 자동 추가)이 있으면 유사도로 변환합니다.
    fn batch_to_passages(batch: &RecordBatch, out: &mut Vec<RetrievedPassage>) -> Result<()> {
        let contents = batch
            .column_by_name(CONTENT_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("Missing content column"))?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        for i in 0..batch.num_rows() {
            if contents.is_null(i) {
                continue;
            }
            // L2 거리 -> 유사도 근사
            let similarity = distances
                .map(|d| 1.0 / (1.0 + d.value(i)))
                .unwrap_or(0.0);

            out.push(RetrievedPassage {
                content: contents.value(i).to_string(),
                similarity,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl CollectionIndex for LanceCollection {
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let batches: Vec<RecordBatch> = self
            .table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .column(EMBEDDING_COLUMN)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await?;

        let mut passages = Vec::new();
        for batch in &batches {
            Self::batch_to_passages(batch, &mut passages)?;
        }
        Ok(passages)
    }

    async fn scan(&self, limit: usize) -> Result<Vec<RetrievedPassage>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .limit(limit)
            .execute()
            .await
            .context("Failed to scan passages")?
            .try_collect()
            .await?;

        let mut passages = Vec::new();
        for batch in &batches {
            Self::batch_to_passages(batch, &mut passages)?;
        }
        Ok(passages)
    }

    async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// LanceIndexLoader
// ============================================================================

/// 인덱스 루트 아래의 컬렉션 디렉토리를 여는 로더
#[derive(Debug, Clone)]
pub struct LanceIndexLoader {
    root: PathBuf,
    dimension: usize,
}

impl LanceIndexLoader {
    pub fn new(root: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            root: root.into(),
            dimension,
        }
    }

    /// 컬렉션 디렉토리 경로
    pub fn collection_path(&self, collection_id: &str) -> PathBuf {
        self.root.join(collection_id)
    }

    /// 인덱스 루트 아래의 컬렉션 후보 목록 (디렉토리 이름, 정렬됨)
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read index root {}", self.root.display()))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join(format!("{}.lance", TABLE_NAME)).exists() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl IndexLoader for LanceIndexLoader {
    async fn load(&self, collection_id: &str) -> Result<Arc<dyn CollectionIndex>> {
        let path = self.collection_path(collection_id);
        tracing::info!(collection_id, path = %path.display(), "Loading vector index");

        let collection = LanceCollection::open(&path, self.dimension).await?;
        Ok(Arc::new(collection))
    }
}

// ============================================================================
// Tests
// ============================================================================
