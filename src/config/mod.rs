//! 서비스 설정
//!
//! 프로세스 시작 시 CLI 인자와 환경변수로 한 번 구성되고 이후 변경되지 않습니다.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::embedding::{DEFAULT_DIMENSION, SUPPORTED_DIMENSIONS};
use crate::generation::GenerationConfig;
use crate::knowledge::ChunkConfig;
use crate::orchestrator::DEFAULT_REQUEST_TIMEOUT;

/// 기본 바인드 주소
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

/// 서비스 설정
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// 컬렉션 디렉토리들의 상위 경로 (`<index_root>/<collectionId>/`)
    pub index_root: PathBuf,
    /// 허용 CORS origin (`None`이면 모든 origin)
    pub cors_origin: Option<String>,
    pub request_timeout: Duration,
    pub generation: GenerationConfig,
    pub embedding_dimension: usize,
    pub chunk: ChunkConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            index_root: PathBuf::from("./"),
            cors_origin: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            generation: GenerationConfig::default(),
            embedding_dimension: DEFAULT_DIMENSION,
            chunk: ChunkConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            anyhow::bail!("Request timeout must be greater than zero");
        }
        if !SUPPORTED_DIMENSIONS.contains(&self.embedding_dimension) {
            anyhow::bail!(
                "Invalid embedding dimension: {}. Must be 768, 1536, or 3072",
                self.embedding_dimension
            );
        }
        if self.generation.model.trim().is_empty() {
            anyhow::bail!("Generation model name must not be empty");
        }
        if let Some(origin) = &self.cors_origin {
            if origin.trim().is_empty() {
                anyhow::bail!("CORS origin must not be blank");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.index_root, PathBuf::from("./"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ServiceConfig {
            request_timeout: Duration::ZERO,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServiceConfig {
            embedding_dimension: 512,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServiceConfig {
            cors_origin: Some(" ".to_string()),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
