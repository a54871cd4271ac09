//! 프롬프트 체인 모듈
//!
//! 체인 하나 = 고정 템플릿 렌더링 + 생성 호출 한 번.
//!
//! - Targeted-Answer: 검색 패시지 + 대화 기록 + 질문
//! - Document-Summary: 문서 본문 (길면 map-reduce)
//! - Interaction-Summary: 대화 기록

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::generation::GenerationProvider;
use crate::knowledge::{ChunkConfig, Chunker, WindowChunker};

/// 정보가 부족할 때 사용하는 고정 거절 문구
pub const FALLBACK_ANSWER: &str =
    "I don't have enough information in the provided documents to answer that.";

// ============================================================================
// Templates
// ============================================================================

const TARGETED_ANSWER_TEMPLATE: &str = r#"You are a knowledgeable assistant answering questions about a document collection for a student audience.

Guidelines:
1. Answer strictly from the Context and the Previous Interactions below. Do not use outside knowledge.
2. If they do not contain enough information to answer, reply exactly with: "{fallback}"
3. Use the Previous Interactions for continuity: connect follow-up questions to points already discussed and do not repeat earlier answers verbatim.
4. Keep the answer concise but complete. Use bullet points or numbered lists when they make the answer clearer.
5. If the context is uncertain or contradictory, say so.

Context:
{document_data}

Previous Interactions:
{previous_interactions}

User's Question: {query}

Answer:
"#;

const DOCUMENT_SUMMARY_TEMPLATE: &str = r#"You are an assistant that writes comprehensive summaries of documents.

Guidelines:
1. Read all of the content below.
2. Write a coherent, well-structured summary covering the main topics and key points.
3. Organize it into sections with headings.
4. Highlight important concepts, procedures, and figures.
5. Note any conflicting or controversial points.
6. Use bullet points or numbered lists for key information.

Content to summarize:
{document_data}

Summary:
"#;

const INTERACTION_SUMMARY_TEMPLATE: &str = r#"You are an assistant that summarizes a conversation between a student and a document question-answering assistant.

Guidelines:
1. Read all of the interactions below.
2. Summarize the main topics and key points that were covered.
3. Describe how the conversation progressed and how later questions built on earlier ones.
4. Point out recurring themes.
5. Highlight any corrections or clarifications made in later interactions.
6. Use bullet points or numbered lists where helpful.

Previous Interactions:
{previous_interactions}

Summary of the conversation:
"#;

// ============================================================================
// PromptChain
// ============================================================================

/// 고정 입력 변수와 템플릿을 가진 단일 생성 단계
#[derive(Debug, Clone)]
pub struct PromptChain {
    pub name: &'static str,
    template: &'static str,
    input_variables: &'static [&'static str],
}

impl PromptChain {
    pub const fn new(
        name: &'static str,
        template: &'static str,
        input_variables: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            template,
            input_variables,
        }
    }

    pub fn input_variables(&self) -> &'static [&'static str] {
        self.input_variables
    }

    /// 템플릿 렌더링
    ///
    /// 선언된 변수는 모두 제공되어야 하며, 선언되지 않은 변수는 거부합니다.
    /// 치환은 한 번에 수행하므로 값 안의 `{...}`는 다시 치환되지 않습니다.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String> {
        let provided: HashMap<&str, &str> = vars.iter().copied().collect();

        if let Some(unknown) = provided
            .keys()
            .find(|k| !self.input_variables.iter().any(|v| v == *k))
        {
            anyhow::bail!("Chain '{}' has no input variable '{}'", self.name, unknown);
        }
        if let Some(missing) = self
            .input_variables
            .iter()
            .find(|v| !provided.contains_key(*v))
        {
            anyhow::bail!("Chain '{}' is missing input variable '{}'", self.name, missing);
        }

        let mut out = String::with_capacity(
            self.template.len() + provided.values().map(|v| v.len()).sum::<usize>(),
        );
        let mut rest = self.template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if provided.contains_key(&after[..close]) => {
                    out.push_str(provided[&after[..close]]);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);

        Ok(out)
    }

    /// 렌더링 후 생성 호출
    pub async fn run(
        &self,
        generator: &dyn GenerationProvider,
        vars: &[(&str, &str)],
    ) -> Result<String> {
        let prompt = self.render(vars)?;
        tracing::debug!(chain = self.name, prompt_chars = prompt.len(), "Running chain");

        generator
            .generate(&prompt)
            .await
            .with_context(|| format!("Chain '{}' generation failed", self.name))
    }
}

pub fn targeted_answer_chain() -> PromptChain {
    PromptChain::new(
        "targeted_answer",
        TARGETED_ANSWER_TEMPLATE,
        &["fallback", "document_data", "previous_interactions", "query"],
    )
}

pub fn document_summary_chain() -> PromptChain {
    PromptChain::new(
        "document_summary",
        DOCUMENT_SUMMARY_TEMPLATE,
        &["document_data"],
    )
}

pub fn interaction_summary_chain() -> PromptChain {
    PromptChain::new(
        "interaction_summary",
        INTERACTION_SUMMARY_TEMPLATE,
        &["previous_interactions"],
    )
}

// ============================================================================
// Chain Runners
// ============================================================================

/// Targeted-Answer 체인 실행
///
/// 검색 결과가 비어 있어도 그대로 실행합니다 (체인의 거절 문구가 유일한 방어).
pub async fn answer_from_context(
    generator: &dyn GenerationProvider,
    content: &str,
    history: &str,
    question: &str,
) -> Result<String> {
    targeted_answer_chain()
        .run(
            generator,
            &[
                ("fallback", FALLBACK_ANSWER),
                ("document_data", content),
                ("previous_interactions", history),
                ("query", question),
            ],
        )
        .await
}

/// Interaction-Summary 체인 실행
pub async fn summarize_interactions(
    generator: &dyn GenerationProvider,
    history: &str,
) -> Result<String> {
    interaction_summary_chain()
        .run(generator, &[("previous_interactions", history)])
        .await
}

/// 문서 전체 추론이 필요한 질문의 답변
///
/// 문서를 map-reduce로 요약한 뒤 그 요약을 컨텍스트로 Targeted-Answer 체인을 실행합니다.
pub async fn full_answer(
    generator: &dyn GenerationProvider,
    summarizer: &MapReduceSummarizer,
    content: &str,
    history: &str,
    question: &str,
) -> Result<String> {
    let summary = summarizer.summarize(generator, content).await?;
    answer_from_context(generator, &summary, history, question).await
}

// ============================================================================
// MapReduceSummarizer
// ============================================================================

/// map-reduce 문서 요약기
///
/// 한 번에 들어가는 본문은 체인 한 번으로 요약하고, 그렇지 않으면
/// 윈도우별로 요약(map)한 뒤 요약들을 이어 붙여 다시 요약(reduce)합니다.
pub struct MapReduceSummarizer {
    chunker: WindowChunker,
    chain: PromptChain,
    max_reduce_rounds: usize,
}

impl MapReduceSummarizer {
    pub const DEFAULT_MAX_REDUCE_ROUNDS: usize = 4;

    pub fn new(config: ChunkConfig) -> Self {
        Self {
            chunker: WindowChunker::new(config),
            chain: document_summary_chain(),
            max_reduce_rounds: Self::DEFAULT_MAX_REDUCE_ROUNDS,
        }
    }

    pub fn with_max_reduce_rounds(mut self, rounds: usize) -> Self {
        self.max_reduce_rounds = rounds;
        self
    }

    /// 본문 요약
    pub async fn summarize(
        &self,
        generator: &dyn GenerationProvider,
        content: &str,
    ) -> Result<String> {
        let mut text = content.to_string();
        let mut round = 0;

        while !self.chunker.fits(&text) {
            if round >= self.max_reduce_rounds {
                tracing::warn!(
                    rounds = round,
                    remaining_chars = text.len(),
                    "Reduce did not converge, truncating to one window"
                );
                text = self.chunker.chunk(&text).into_iter().next().unwrap_or_default();
                break;
            }

            let chunks = self.chunker.chunk(&text);
            tracing::info!(round, chunks = chunks.len(), "Map step over document windows");

            let mut summaries = Vec::with_capacity(chunks.len());
            for (i, chunk) in chunks.iter().enumerate() {
                tracing::debug!(round, chunk = i + 1, total = chunks.len(), "Summarizing window");
                summaries.push(self.chain.run(generator, &[("document_data", chunk)]).await?);
            }

            text = summaries.join("\n\n");
            round += 1;
        }

        self.chain.run(generator, &[("document_data", &text)]).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 프롬프트를 기록하고 고정 길이 응답을 돌려주는 생성기
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    impl RecordingGenerator {
        fn new(reply: &str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                reply: reply.to_string(),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationProvider for RecordingGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn test_render_substitutes_all_variables() {
        let chain = interaction_summary_chain();
        let prompt = chain
            .render(&[("previous_interactions", "1. Q: a\nA: b")])
            .unwrap();
        assert!(prompt.contains("1. Q: a\nA: b"));
        assert!(!prompt.contains("{previous_interactions}"));
    }

    #[test]
    fn test_render_rejects_missing_and_unknown() {
        let chain = targeted_answer_chain();
        assert!(chain.render(&[("query", "q")]).is_err());
        assert!(document_summary_chain()
            .render(&[("document_data", "x"), ("extra", "y")])
            .is_err());
    }

    #[test]
    fn test_render_does_not_reexpand_values() {
        let chain = document_summary_chain();
        let prompt = chain
            .render(&[("document_data", "literal {document_data} and {braces}")])
            .unwrap();
        assert!(prompt.contains("literal {document_data} and {braces}"));
    }

    #[tokio::test]
    async fn test_targeted_answer_with_empty_context_still_calls_model() {
        let generator = RecordingGenerator::new(FALLBACK_ANSWER);
        let answer = answer_from_context(&generator, "", "", "What is X?").await.unwrap();

        assert_eq!(answer, FALLBACK_ANSWER);
        assert_eq!(generator.calls(), 1);
        let prompt = &generator.prompts.lock().unwrap()[0];
        assert!(prompt.contains("User's Question: What is X?"));
        assert!(prompt.contains(FALLBACK_ANSWER));
    }

    #[tokio::test]
    async fn test_small_document_is_summarized_once() {
        let generator = RecordingGenerator::new("summary");
        let summarizer = MapReduceSummarizer::new(ChunkConfig {
            max_characters: 1000,
            overlap_characters: 10,
        });

        let result = summarizer.summarize(&generator, "short document").await.unwrap();
        assert_eq!(result, "summary");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_large_document_uses_map_reduce() {
        let generator = RecordingGenerator::new("s");
        let summarizer = MapReduceSummarizer::new(ChunkConfig {
            max_characters: 100,
            overlap_characters: 10,
        });
        let content = "word ".repeat(100);

        let result = summarizer.summarize(&generator, &content).await.unwrap();
        assert_eq!(result, "s");
        // 여러 map 호출 + 최종 reduce 호출
        assert!(generator.calls() > 2);
        let last = generator.prompts.lock().unwrap().last().cloned().unwrap();
        assert!(last.contains("s\n\ns"));
    }

    #[tokio::test]
    async fn test_full_answer_summarizes_then_answers() {
        let generator = RecordingGenerator::new("done");
        let summarizer = MapReduceSummarizer::new(ChunkConfig::default());

        let answer = full_answer(&generator, &summarizer, "doc body", "", "Main themes?")
            .await
            .unwrap();

        assert_eq!(answer, "done");
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Content to summarize:\ndoc body"));
        assert!(prompts[1].contains("Context:\ndone"));
        assert!(prompts[1].contains("User's Question: Main themes?"));
    }

    #[tokio::test]
    async fn test_non_shrinking_model_terminates() {
        let generator = RecordingGenerator::new(&"x ".repeat(80));
        let summarizer = MapReduceSummarizer::new(ChunkConfig {
            max_characters: 100,
            overlap_characters: 10,
        })
        .with_max_reduce_rounds(2);
        let content = "word ".repeat(100);

        let result = summarizer.summarize(&generator, &content).await;
        assert!(result.is_ok());
    }
}
