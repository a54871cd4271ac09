//! Text Chunking Module
//!
//! 생성 호출 하나의 입력 한도를 넘는 본문을 고정 크기의 겹치는 윈도우로 나눕니다.
//! map-reduce 요약의 map 단계 입력으로 쓰입니다.

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (크기는 UTF-8 바이트 기준)
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkConfig {
    /// 윈도우 최대 크기
    pub max_characters: usize,
    /// 연속 윈도우 간 오버랩 크기
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 12_000,
            overlap_characters: 500,
        }
    }
}

impl ChunkConfig {
    /// 설정 보정 (max >= 1, overlap < max)
    pub fn normalized(self) -> Self {
        let max_characters = self.max_characters.max(1);
        let overlap_characters = if self.overlap_characters >= max_characters {
            max_characters / 2
        } else {
            self.overlap_characters
        };
        Self {
            max_characters,
            overlap_characters,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 한 청크에 들어가는지 여부
    fn fits(&self, text: &str) -> bool;
}

// ============================================================================
// WindowChunker
// ============================================================================

/// 고정 크기 오버랩 윈도우 청커
///
/// 윈도우 뒤쪽 절반에 공백이 있으면 그 위치에서 끊어 단어가 잘리지 않게 합니다.
#[derive(Debug, Clone)]
pub struct WindowChunker {
    config: ChunkConfig,
}

impl WindowChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    /// start에서 시작하는 윈도우의 끝 위치
    fn window_end(&self, text: &str, start: usize) -> usize {
        let mut end = floor_char_boundary(text, start + self.config.max_characters);

        if end < text.len() {
            let window = &text[start..end];
            if let Some(pos) = window.rfind(char::is_whitespace) {
                if pos >= window.len() / 2 {
                    end = start + pos;
                }
            }
        }

        // 최대 크기가 문자 하나보다 작은 경우에도 진행 보장
        if end <= start {
            end = start
                + text[start..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
        }

        end
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        if self.fits(text) {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let end = self.window_end(text, start);

            let piece = text[start..end].trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }

            if end >= text.len() {
                break;
            }

            let next = floor_char_boundary(text, end.saturating_sub(self.config.overlap_characters));
            start = if next > start { next } else { end };
        }

        chunks
    }

    fn fits(&self, text: &str) -> bool {
        text.len() <= self.config.max_characters
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

// ============================================================================
// Tests
// ============================================================================
