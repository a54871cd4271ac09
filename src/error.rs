//! 에러 타입 - 질의 처리 경계의 에러 분류
//!
//! 프로바이더·로더 내부는 `anyhow::Result`를 쓰고, 오케스트레이터와
//! HTTP 경계에서 이 타입으로 분류합니다.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    /// 필수 요청 필드 누락 등 클라이언트 오류 (재시도 불가)
    #[error("{0}")]
    Validation(String),

    /// 컬렉션 인덱스를 찾을 수 없거나 손상됨 (캐시는 건드리지 않음)
    #[error("Collection '{collection_id}' could not be loaded: {source:#}")]
    IndexLoad {
        collection_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// 임베딩 또는 생성 호출 실패
    #[error("{context}: {source:#}")]
    Provider {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// 요청 제한 시간 초과 (재시도 가능)
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl RagError {
    pub fn provider(context: &'static str, source: anyhow::Error) -> Self {
        Self::Provider { context, source }
    }

    /// 클라이언트 오류 여부 (400 계열)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// 같은 요청을 그대로 재시도해도 되는지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
