//! 질의 분류 모듈
//!
//! 질문을 어떤 체인으로 보낼지 결정합니다.
//!
//! 우선순위:
//! 1. "summary"/"summarize" + "responses"/"interactions" -> 대화 요약
//! 2. "summary"/"summarize" -> 문서 요약
//! 3. 모델 분류 결과 (FULL -> 전체 문서 답변, PARTIAL -> 부분 검색 답변)

use std::fmt;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use regex::Regex;
use serde::Serialize;

use crate::generation::GenerationProvider;

// ============================================================================
// Types
// ============================================================================

/// 답변에 필요한 문서 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// 문서 전체에 대한 추론 필요
    Full,
    /// 국소적인 세부 정보로 충분
    Partial,
}

/// 분류 결과 (rationale은 진단용)
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationDecision {
    pub scope: Scope,
    pub rationale: String,
}

impl ClassificationDecision {
    fn fallback(reason: impl Into<String>) -> Self {
        Self {
            scope: Scope::Partial,
            rationale: reason.into(),
        }
    }
}

/// 체인 선택 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryRoute {
    PartialAnswer,
    DocumentSummary,
    InteractionSummary,
    FullAnswer,
}

impl fmt::Display for QueryRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PartialAnswer => "partial_answer",
            Self::DocumentSummary => "document_summary",
            Self::InteractionSummary => "interaction_summary",
            Self::FullAnswer => "full_answer",
        };
        f.write_str(name)
    }
}

impl From<Scope> for QueryRoute {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Full => Self::FullAnswer,
            Scope::Partial => Self::PartialAnswer,
        }
    }
}

// ============================================================================
// Keyword Routing
// ============================================================================

const SUMMARY_KEYWORDS: [&str; 2] = ["summary", "summarize"];
const HISTORY_KEYWORDS: [&str; 2] = ["responses", "interactions"];

/// 키워드 기반 요약 경로 결정 (대소문자 무시)
///
/// 요약 키워드가 없으면 `None`을 반환하고 모델 분류로 넘어갑니다.
pub fn keyword_route(question: &str) -> Option<QueryRoute> {
    let lower = question.to_lowercase();

    if !SUMMARY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return None;
    }

    if HISTORY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Some(QueryRoute::InteractionSummary)
    } else {
        Some(QueryRoute::DocumentSummary)
    }
}

// ============================================================================
// QueryClassifier
// ============================================================================

const CLASSIFIER_PROMPT: &str = r#"You are a routing assistant for a document question-answering system.
Decide how much of the document is needed to answer the user's question.

Answer FULL when the question needs reasoning over the whole document, for example:
- comparing or contrasting different sections
- identifying global themes, structure, or the overall argument
- an overview or summary of the entire document

Answer PARTIAL when the question asks about a localized detail that a few relevant
passages can answer, for example a definition, a number, a dosage, a date, or a
fact stated in one section.

Respond with exactly two lines and nothing else:
DECISION: FULL or PARTIAL
REASON: one short sentence

Question: {question}
"#;

/// 모델 기반 FULL/PARTIAL 분류기
pub struct QueryClassifier {
    generator: Arc<dyn GenerationProvider>,
}

impl QueryClassifier {
    pub fn new(generator: Arc<dyn GenerationProvider>) -> Self {
        Self { generator }
    }

    /// 분류용 프롬프트
    pub fn prompt(question: &str) -> String {
        CLASSIFIER_PROMPT.replace("{question}", question)
    }

    /// 질문 분류
    ///
    /// 응답을 해석할 수 없으면 PARTIAL로 처리합니다 (비용이 낮은 경로).
    /// 생성 호출 자체의 실패는 에러로 전달합니다.
    pub async fn classify(&self, question: &str) -> Result<ClassificationDecision> {
        let response = self.generator.generate(&Self::prompt(question)).await?;

        let decision = parse_decision(&response).unwrap_or_else(|| {
            tracing::warn!(
                response_preview = %response.chars().take(120).collect::<String>(),
                "Unparsable classifier output, defaulting to PARTIAL"
            );
            ClassificationDecision::fallback("unparsable classifier output")
        });

        tracing::info!(
            scope = ?decision.scope,
            rationale = %decision.rationale,
            "Query classified"
        );
        Ok(decision)
    }
}

fn decision_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[\s>*_#-]*DECISION[\s*_]*:[\s*_]*(FULL|PARTIAL)\b")
            .expect("decision pattern is valid")
    })
}

fn reason_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[\s>*_#-]*REASON[\s*_]*:[\s*_]*(.+)$").expect("reason pattern is valid")
    })
}

/// `DECISION: FULL|PARTIAL` 줄 파싱
pub fn parse_decision(response: &str) -> Option<ClassificationDecision> {
    let caps = decision_regex().captures(response)?;
    let scope = if caps[1].eq_ignore_ascii_case("full") {
        Scope::Full
    } else {
        Scope::Partial
    };

    let rationale = reason_regex()
        .captures(response)
        .map(|c| {
            c[1].trim()
                .trim_end_matches(|ch: char| ch == '*' || ch == '_')
                .trim()
                .to_string()
        })
        .unwrap_or_default();

    Some(ClassificationDecision { scope, rationale })
}

// ============================================================================
// Tests
// ============================================================================
