//! CLI 모듈
//!
//! acolyte-rag CLI 명령어 정의 및 구현

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{ServiceConfig, DEFAULT_BIND_ADDR};
use crate::embedding::{has_api_key, EmbeddingProvider, GeminiEmbedding, DEFAULT_DIMENSION};
use crate::generation::{GeminiGeneration, GenerationConfig, GenerationProvider};
use crate::knowledge::{ChunkConfig, IndexStore, LanceIndexLoader};
use crate::orchestrator::{QueryOrchestrator, QueryRequest};
use crate::server::{self, AppState};
use crate::session::SessionStore;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "acolyte-rag")]
#[command(version, about = "컬렉션 기반 RAG 질의 서비스", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 질의 처리에 공통으로 쓰는 옵션
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// 컬렉션 인덱스 루트 디렉토리
    #[arg(long, env = "ACOLYTE_INDEX_ROOT", default_value = "./")]
    pub index_root: PathBuf,

    /// 생성 모델 이름
    #[arg(long, env = "ACOLYTE_MODEL", default_value = "gemini-1.5-flash")]
    pub model: String,

    /// 요청 제한 시간 (초)
    #[arg(long, env = "ACOLYTE_REQUEST_TIMEOUT_SECS", default_value = "120")]
    pub timeout_secs: u64,

    /// 임베딩 차원 (인덱스 구축 시 사용한 값과 같아야 함)
    #[arg(long, default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP API 서버 실행
    Serve {
        /// 바인드 주소
        #[arg(long, env = "ACOLYTE_BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
        bind: SocketAddr,

        /// 허용할 CORS origin (미지정 시 전체 허용)
        #[arg(long, env = "ACOLYTE_CORS_ORIGIN")]
        cors_origin: Option<String>,

        #[command(flatten)]
        service: ServiceArgs,
    },

    /// 질문 하나를 처리하고 답변 출력 (HTTP 없이)
    Ask {
        /// 질문
        query: String,

        /// 컬렉션 ID
        #[arg(short, long)]
        collection: String,

        /// 세션 ID
        #[arg(short, long, default_value = "cli")]
        session: String,

        #[command(flatten)]
        service: ServiceArgs,
    },

    /// 상태 확인
    Status {
        /// 컬렉션 인덱스 루트 디렉토리
        #[arg(long, env = "ACOLYTE_INDEX_ROOT", default_value = "./")]
        index_root: PathBuf,
    },
}

impl ServiceArgs {
    fn into_config(self, bind_addr: SocketAddr, cors_origin: Option<String>) -> ServiceConfig {
        ServiceConfig {
            bind_addr,
            index_root: self.index_root,
            cors_origin,
            request_timeout: Duration::from_secs(self.timeout_secs),
            generation: GenerationConfig {
                model: self.model,
                ..GenerationConfig::default()
            },
            embedding_dimension: self.dimension,
            chunk: ChunkConfig::default(),
        }
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            bind,
            cors_origin,
            service,
        } => cmd_serve(service.into_config(bind, cors_origin)).await,
        Commands::Ask {
            query,
            collection,
            session,
            service,
        } => {
            let config = service.into_config(ServiceConfig::default().bind_addr, None);
            cmd_ask(config, &collection, &session, &query).await
        }
        Commands::Status { index_root } => cmd_status(&index_root).await,
    }
}

/// 설정으로 오케스트레이터 구성
///
/// Gemini 임베딩/생성 프로바이더와 LanceDB 로더를 연결합니다.
pub fn build_orchestrator(config: &ServiceConfig) -> Result<QueryOrchestrator> {
    config.validate()?;
    ensure_api_key()?;

    let embedder = Arc::new(
        GeminiEmbedding::from_env_with_dimension(config.embedding_dimension)
            .context("GeminiEmbedding 초기화 실패")?,
    );
    let generator = Arc::new(
        GeminiGeneration::from_env(config.generation.clone())
            .context("GeminiGeneration 초기화 실패")?,
    );
    tracing::debug!(
        embedder = embedder.name(),
        generator = generator.name(),
        dimension = embedder.dimension(),
        "Providers configured"
    );

    let loader = Arc::new(LanceIndexLoader::new(
        config.index_root.clone(),
        config.embedding_dimension,
    ));

    let indexes = Arc::new(IndexStore::new(loader, embedder));
    let sessions = Arc::new(SessionStore::new());

    Ok(
        QueryOrchestrator::new(indexes, sessions, generator, config.chunk.clone())
            .with_request_timeout(config.request_timeout),
    )
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 서버 실행 명령어 (serve)
async fn cmd_serve(config: ServiceConfig) -> Result<()> {
    let orchestrator = build_orchestrator(&config)?;

    tracing::info!(
        index_root = %config.index_root.display(),
        model = %config.generation.model,
        timeout_secs = config.request_timeout.as_secs(),
        "Starting acolyte-rag server"
    );

    let state = Arc::new(AppState::new(Arc::new(orchestrator)));
    server::serve(state, config.bind_addr, config.cors_origin.as_deref()).await
}

/// 단일 질의 명령어 (ask)
async fn cmd_ask(
    config: ServiceConfig,
    collection: &str,
    session: &str,
    query: &str,
) -> Result<()> {
    let orchestrator = build_orchestrator(&config)?;

    println!("[*] 질의 중: \"{}\" (컬렉션: {})", truncate_text(query, 80), collection);

    let outcome = orchestrator
        .answer(&QueryRequest::new(collection, query, session))
        .await
        .context("질의 처리 실패")?;

    println!("[OK] 경로: {}\n", outcome.route);
    println!("{}", outcome.answer);

    Ok(())
}

/// 상태 명령어 (status)
///
/// 시스템 상태를 확인합니다.
async fn cmd_status(index_root: &Path) -> Result<()> {
    println!("acolyte-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 인덱스 루트: {}", index_root.display());

    // API 키 상태
    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    // 컬렉션 목록
    let loader = LanceIndexLoader::new(index_root, DEFAULT_DIMENSION);
    match loader.list_collections() {
        Ok(collections) if collections.is_empty() => {
            println!("[!] 컬렉션이 없습니다.");
        }
        Ok(collections) => {
            println!("[OK] 컬렉션: {} 개", collections.len());
            for id in collections {
                println!("     - {}", id);
            }
        }
        Err(e) => {
            println!("[!] 컬렉션 조회 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn ensure_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
