//! Question answering for one session.
//!
//! [`ChatService::answer`] holds the session's lock for the whole exchange:
//! reset, history read, document selection, upstream call and append. Two
//! questions in the same session are therefore answered one after the other,
//! each seeing the previous one's turn.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::analyzer::QueryAnalyzer;
use crate::completion::{CompletionClient, OpenAiClient, UpstreamError};
use crate::config::{ChatConfig, Config};
use crate::conversation::ConversationStore;
use crate::documents::DocumentStore;
use crate::models::Turn;
use crate::prompt::{compose, NO_DOCUMENT_ANSWER};

#[derive(Debug, Error)]
pub enum AskError {
    #[error("{0}")]
    Input(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub response: String,
    pub document_used: Option<String>,
    /// Timestamp of the recorded turn.
    pub asked_at: DateTime<Utc>,
}

impl Answer {
    fn recorded(turn: &Turn) -> Self {
        Self {
            response: turn.answer.clone(),
            document_used: turn.document_used.clone(),
            asked_at: turn.asked_at,
        }
    }
}

pub struct ChatService {
    documents: Arc<DocumentStore>,
    analyzer: QueryAnalyzer,
    conversations: Arc<ConversationStore>,
    completion: Arc<dyn CompletionClient>,
    settings: ChatConfig,
}

impl ChatService {
    pub fn new(
        documents: Arc<DocumentStore>,
        analyzer: QueryAnalyzer,
        conversations: Arc<ConversationStore>,
        completion: Arc<dyn CompletionClient>,
        settings: ChatConfig,
    ) -> Self {
        Self {
            documents,
            analyzer,
            conversations,
            completion,
            settings,
        }
    }

    /// Loads the documents and builds an OpenAI-backed service from
    /// `config`. Fails when no document can be loaded.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let documents =
            DocumentStore::load_all(&config.documents.dir, &config.documents.include_globs)?;
        let completion = OpenAiClient::new(&config.completion)?;
        Ok(Self::new(
            Arc::new(documents),
            QueryAnalyzer::new(&config.analyzer),
            Arc::new(ConversationStore::new()),
            Arc::new(completion),
            config.chat.clone(),
        ))
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Trims `question` and checks it is non-empty and within the
    /// configured length.
    pub fn validate_question(&self, question: &str) -> Result<String, AskError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AskError::Input("No se proporcionó ninguna pregunta".to_string()));
        }
        if question.chars().count() > self.settings.max_question_chars {
            return Err(AskError::Input(format!(
                "La pregunta excede el máximo de {} caracteres",
                self.settings.max_question_chars
            )));
        }
        Ok(question.to_string())
    }

    pub async fn answer(
        &self,
        question: &str,
        session_id: &str,
        reset: bool,
    ) -> Result<Answer, AskError> {
        let question = self.validate_question(question)?;
        if session_id.trim().is_empty() {
            return Err(AskError::Input(
                "El identificador de sesión no puede estar vacío".to_string(),
            ));
        }

        let mut session = self.conversations.lock(session_id).await;
        if reset {
            session.reset();
            info!(session = %session.session_id(), "conversation reset");
        }
        if let Some(last) = session.turns().last() {
            debug!(
                session = %session.session_id(),
                turns = session.turns().len(),
                last_asked_at = %last.asked_at,
                "continuing conversation"
            );
        }

        // Continuity follows the immediately preceding turn, independent of
        // how much history goes into the prompt.
        let Some(selection) =
            self.analyzer
                .select_document(&question, self.documents.documents(), session.turns())
        else {
            info!(session = %session.session_id(), "no matching document; answering with fallback");
            let turn = Turn::new(question, NO_DOCUMENT_ANSWER, None);
            let answer = Answer::recorded(&turn);
            session.append(turn);
            return Ok(answer);
        };

        let history = session.recent(self.settings.history_turns);
        let filename = selection.document.filename.clone();
        info!(
            session = %session.session_id(),
            document = %filename,
            score = selection.score,
            history = history.len(),
            "answering question"
        );

        let messages = compose(
            &selection,
            &history,
            &question,
            self.settings.excerpt_max_chars,
        );
        let response = self.completion.complete(&messages).await.map_err(|e| {
            error!(session = %session_id, document = %filename, error = %e, "completion failed");
            AskError::from(e)
        })?;

        let turn = Turn::new(question, response, Some(filename));
        let answer = Answer::recorded(&turn);
        session.append(turn);
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::models::{Document, Section};
    use crate::prompt::{ChatMessage, Role};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeClient {
        fail: bool,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl CompletionClient for FakeClient {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError> {
            self.calls.lock().await.push(messages.to_vec());
            if self.fail {
                return Err(UpstreamError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(format!("respuesta {}", self.calls.lock().await.len()))
        }
    }

    fn doc(filename: &str, title: &str, heading: &str) -> Document {
        Document {
            filename: filename.into(),
            title: title.into(),
            raw_text: format!("{}\n{}", title, heading),
            sections: vec![Section {
                heading: heading.into(),
                body: String::new(),
            }],
            tables: vec![],
        }
    }

    fn service(client: Arc<FakeClient>) -> ChatService {
        let store = DocumentStore::from_documents(vec![
            doc("compras.docx", "Funnel de Compras", "KPIs de supply"),
            doc("ventas.docx", "Funnel de Ventas", "KPIs de sales"),
        ]);
        ChatService::new(
            Arc::new(store),
            QueryAnalyzer::new(&AnalyzerConfig::default()),
            Arc::new(ConversationStore::new()),
            client,
            ChatConfig::default(),
        )
    }

    #[tokio::test]
    async fn answers_from_selected_document_and_records_turn() {
        let client = Arc::new(FakeClient::default());
        let svc = service(client.clone());

        let answer = svc
            .answer("¿Cuáles son los KPIs del funnel de ventas?", "s1", false)
            .await
            .unwrap();
        assert_eq!(answer.document_used.as_deref(), Some("ventas.docx"));
        assert_eq!(answer.response, "respuesta 1");

        let turns = svc.conversations().recent("s1", 5).await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].document_used.as_deref(), Some("ventas.docx"));
    }

    #[tokio::test]
    async fn history_is_sent_with_follow_up() {
        let client = Arc::new(FakeClient::default());
        let svc = service(client.clone());
        svc.answer("KPIs de compras", "s1", false).await.unwrap();
        svc.answer("¿y el funnel?", "s1", false).await.unwrap();

        let calls = client.calls.lock().await;
        let second = &calls[1];
        assert_eq!(second[2].role, Role::User);
        assert_eq!(second[2].content, "KPIs de compras");
        assert_eq!(second[3].role, Role::Assistant);
        // Tied funnel question stays on the previous document.
        assert!(second[0].content.contains("compras.docx"));
    }

    #[tokio::test]
    async fn tied_follow_up_keeps_previous_document_without_prompt_history() {
        let client = Arc::new(FakeClient::default());
        let store = DocumentStore::from_documents(vec![
            doc("alfa.docx", "Catálogo", "KPIs"),
            doc("zeta.docx", "Ventas", "KPIs"),
        ]);
        let svc = ChatService::new(
            Arc::new(store),
            QueryAnalyzer::new(&AnalyzerConfig::default()),
            Arc::new(ConversationStore::new()),
            client.clone(),
            ChatConfig {
                history_turns: 0,
                ..ChatConfig::default()
            },
        );

        let first = svc.answer("ventas", "s1", false).await.unwrap();
        assert_eq!(first.document_used.as_deref(), Some("zeta.docx"));

        let follow_up = svc.answer("kpi", "s1", false).await.unwrap();
        assert_eq!(follow_up.document_used.as_deref(), Some("zeta.docx"));
        // system prompt, excerpt, question: no prompt history
        assert_eq!(client.calls.lock().await[1].len(), 3);
    }

    #[tokio::test]
    async fn answer_carries_recorded_turn_timestamp() {
        let svc = service(Arc::new(FakeClient::default()));
        let before = Utc::now();
        let answer = svc.answer("ventas", "s1", false).await.unwrap();

        let turns = svc.conversations().recent("s1", 1).await;
        assert_eq!(answer.asked_at, turns[0].asked_at);
        assert!(answer.asked_at >= before);
    }

    #[tokio::test]
    async fn blank_session_id_is_input_error() {
        let svc = service(Arc::new(FakeClient::default()));
        match svc.answer("ventas", "  ", false).await {
            Err(AskError::Input(msg)) => assert!(msg.contains("sesión"), "{msg}"),
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_match_returns_fallback_without_upstream_call() {
        let client = Arc::new(FakeClient::default());
        let svc = service(client.clone());

        let answer = svc.answer("¿Qué hora es?", "s1", false).await.unwrap();
        assert_eq!(answer.response, NO_DOCUMENT_ANSWER);
        assert!(answer.document_used.is_none());
        assert!(client.calls.lock().await.is_empty());

        let turns = svc.conversations().recent("s1", 5).await;
        assert_eq!(turns.len(), 1);
        assert!(turns[0].document_used.is_none());
    }

    #[tokio::test]
    async fn upstream_failure_does_not_append_turn() {
        let client = Arc::new(FakeClient {
            fail: true,
            ..Default::default()
        });
        let svc = service(client);

        let err = svc.answer("ventas", "s1", false).await.unwrap_err();
        assert!(matches!(err, AskError::Upstream(_)));
        assert!(svc.conversations().recent("s1", 5).await.is_empty());
    }

    #[tokio::test]
    async fn empty_or_oversized_question_is_input_error() {
        let svc = service(Arc::new(FakeClient::default()));
        assert!(matches!(
            svc.answer("   ", "s1", false).await,
            Err(AskError::Input(_))
        ));
        let long = "ventas ".repeat(1000);
        assert!(matches!(
            svc.answer(&long, "s1", false).await,
            Err(AskError::Input(_))
        ));
        assert_eq!(svc.conversations().session_count(), 0);
    }

    #[tokio::test]
    async fn reset_clears_history_before_answering() {
        let client = Arc::new(FakeClient::default());
        let svc = service(client.clone());
        svc.answer("ventas", "s1", false).await.unwrap();
        svc.answer("compras", "s1", true).await.unwrap();

        let turns = svc.conversations().recent("s1", 5).await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].question, "compras");
        // system prompt, excerpt, question: no history
        assert_eq!(client.calls.lock().await[1].len(), 3);
    }
}
