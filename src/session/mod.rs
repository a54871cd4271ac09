//! 세션 모듈 - 세션별 대화 기록
//!
//! 세션마다 최근 10개의 (질문, 답변)만 보관합니다 (FIFO 축출).
//! 기록은 프로세스 메모리에만 있으며 재시작 시 사라집니다.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// 세션당 최대 기록 수
pub const MAX_INTERACTIONS: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// 한 번의 질의응답
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub question: String,
    pub answer: String,
    /// 진단용 (프롬프트에는 포함하지 않음)
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            created_at: Utc::now(),
        }
    }
}

type History = Arc<AsyncMutex<VecDeque<Interaction>>>;

// ============================================================================
// SessionStore
// ============================================================================

/// 세션 기록 저장소
///
/// 같은 세션에 대한 요청은 `lock`으로 직렬화되고, 세션 간에는 잠금을 공유하지 않습니다.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, History>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 세션 잠금 획득 (요청 처리 동안 보유)
    ///
    /// 처음 보는 세션이면 빈 기록으로 생성합니다.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let history = self.history(session_id);
        SessionGuard {
            session_id: session_id.to_string(),
            history: history.lock_owned().await,
        }
    }

    /// 기록 조회 (시간순, 없으면 빈 목록)
    ///
    /// 조회만으로는 세션을 만들지 않습니다.
    pub async fn get(&self, session_id: &str) -> Vec<Interaction> {
        match self.existing(session_id) {
            Some(history) => history.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// 기록 추가 (원자적 read-modify-write)
    pub async fn append(&self, session_id: &str, interaction: Interaction) {
        self.lock(session_id).await.append(interaction);
    }

    /// 프롬프트용 번호 매긴 Q/A 기록
    pub async fn format_for_prompt(&self, session_id: &str) -> String {
        match self.existing(session_id) {
            Some(history) => format_interactions(history.lock().await.iter()),
            None => String::new(),
        }
    }

    /// 추적 중인 세션 수
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn existing(&self, session_id: &str) -> Option<History> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
    }

    fn history(&self, session_id: &str) -> History {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(VecDeque::new())))
            .clone()
    }
}

// ============================================================================
// SessionGuard
// ============================================================================

/// 세션 기록에 대한 배타적 접근
pub struct SessionGuard {
    session_id: String,
    history: OwnedMutexGuard<VecDeque<Interaction>>,
}

impl SessionGuard {
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// 끝에 추가하고 초과분은 앞에서부터 제거
    pub fn append(&mut self, interaction: Interaction) {
        self.history.push_back(interaction);
        while self.history.len() > MAX_INTERACTIONS {
            if self.history.pop_front().is_some() {
                tracing::debug!(session_id = %self.session_id, "Evicted oldest interaction");
            }
        }
    }

    pub fn format_for_prompt(&self) -> String {
        format_interactions(self.history.iter())
    }
}

/// `{n}. Q: ...\nA: ...` 형식으로 빈 줄로 구분하여 렌더링
///
/// 기록이 없으면 빈 문자열입니다.
pub fn format_interactions<'a>(interactions: impl IntoIterator<Item = &'a Interaction>) -> String {
    interactions
        .into_iter()
        .enumerate()
        .map(|(i, it)| format!("{}. Q: {}\nA: {}", i + 1, it.question, it.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unseen_session_is_empty() {
        let store = SessionStore::new();
        assert!(store.get("new").await.is_empty());
        assert_eq!(store.format_for_prompt("new").await, "");
    }

    #[tokio::test]
    async fn test_reads_do_not_create_sessions() {
        let store = SessionStore::new();
        for n in 0..5 {
            assert!(store.get(&format!("reader{n}")).await.is_empty());
            assert_eq!(store.format_for_prompt(&format!("reader{n}")).await, "");
        }
        assert_eq!(store.session_count(), 0);

        store.append("writer", Interaction::new("q", "a")).await;
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_session_count_survives_poisoned_lock() {
        let store = Arc::new(SessionStore::new());
        store.append("a", Interaction::new("qa", "aa")).await;

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _sessions = poisoner.sessions.lock().unwrap();
            panic!("poisoned while holding the session map");
        })
        .join();

        assert!(store.sessions.is_poisoned());
        assert_eq!(store.session_count(), 1);
        assert_eq!(store.get("a").await.len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_chronological() {
        let store = SessionStore::new();
        for n in 1..=25 {
            store
                .append("s", Interaction::new(format!("q{n}"), format!("a{n}")))
                .await;

            let history = store.get("s").await;
            assert_eq!(history.len(), n.min(MAX_INTERACTIONS));
            let first = n.saturating_sub(MAX_INTERACTIONS) + 1;
            let expected: Vec<String> = (first..=n).map(|i| format!("q{i}")).collect();
            let actual: Vec<String> = history.into_iter().map(|i| i.question).collect();
            assert_eq!(actual, expected);
        }
    }

    #[tokio::test]
    async fn test_eleven_appends_drop_the_first() {
        let store = SessionStore::new();
        for n in 1..=11 {
            store
                .append("s", Interaction::new(format!("q{n}"), format!("a{n}")))
                .await;
        }

        let history = store.get("s").await;
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].question, "q2");
        assert_eq!(history[9].question, "q11");
    }

    #[tokio::test]
    async fn test_format_for_prompt() {
        let store = SessionStore::new();
        store.append("s", Interaction::new("What is X?", "X is Y.")).await;
        store.append("s", Interaction::new("And Z?", "Z is W.")).await;

        assert_eq!(
            store.format_for_prompt("s").await,
            "1. Q: What is X?\nA: X is Y.\n\n2. Q: And Z?\nA: Z is W."
        );
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        store.append("a", Interaction::new("qa", "aa")).await;
        store.append("b", Interaction::new("qb", "ab")).await;

        assert_eq!(store.get("a").await.len(), 1);
        assert_eq!(store.get("b").await[0].question, "qb");
        assert_eq!(store.session_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut guard = store.lock("shared").await;
                let before = guard.len();
                tokio::time::sleep(Duration::from_millis(5)).await;
                guard.append(Interaction::new(format!("q{n}"), "a"));
                assert_eq!(guard.len(), before + 1);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("shared").await.len(), 8);
    }
}
