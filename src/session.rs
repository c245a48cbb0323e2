//! Retrieval-augmented chat session.
//!
//! A question is sanitized, embedded, matched against the active
//! repository's chunks, and sent to the chat model together with the system
//! instructions, the retrieved context and the recent history. The answer
//! streams back through a callback and the turn is appended to a bounded
//! history window.
//!
//! Once there is history, a follow-up is first rewritten by the chat model
//! into a standalone question, and that rewrite is what gets embedded for
//! retrieval.

use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::embedding::{embed_query, Embedder};
use crate::llm::{ChatMessage, ChatModel, Role, TokenSink};
use crate::models::{ChunkHit, Turn};
use crate::store::{IndexStore, SearchFilter};

pub const SYSTEM_PROMPT: &str = "\
You are a coding assistant helping a programmer with their own codebase. \
You have been given excerpts of that codebase as context and understand it in detail. \
Follow the programmer's requirements carefully and stay technical. \
Think through your answer step by step, and prefer code that fits the tools, \
technologies and design patterns already used in the codebase. \
Mention the files that need to change, or the new files that need to be created. \
If you do not know the answer to a question, say \"I don't know\".";

pub const CONDENSE_PROMPT: &str = "\
Given the conversation below and a follow-up question, rewrite the follow-up \
as a single standalone question that can be understood without the conversation. \
Keep file names, identifiers and technical terms exactly as written. \
Reply with the rewritten question only.";

/// The most recent `window` question/answer turns.
#[derive(Debug, Clone)]
pub struct ConversationState {
    window: usize,
    turns: VecDeque<Turn>,
}

impl ConversationState {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            turns: VecDeque::with_capacity(window),
        }
    }

    /// Append a turn, evicting the oldest once the window is full.
    pub fn push(&mut self, turn: Turn) {
        while self.turns.len() >= self.window {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Trim a question and fold embedded line breaks into single spaces.
pub fn sanitize_question(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Exit,
    Update,
    Empty,
    Question(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let question = sanitize_question(line);
        if question.is_empty() {
            return Input::Empty;
        }
        match question.to_ascii_lowercase().as_str() {
            "exit" => Input::Exit,
            "update" => Input::Update,
            _ => Input::Question(question),
        }
    }
}

/// An answered question.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Files the context was drawn from, closest first, without repeats.
    pub sources: Vec<String>,
}

pub struct ChatSession {
    repo_path: String,
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
    history: ConversationState,
}

impl ChatSession {
    pub fn new(
        repo_path: impl Into<String>,
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        top_k: usize,
        history_window: usize,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            store,
            embedder,
            chat,
            top_k: top_k.max(1),
            history: ConversationState::new(history_window),
        }
    }

    pub fn history(&self) -> &ConversationState {
        &self.history
    }

    /// Answer `question`, streaming tokens to `on_token`. The turn is only
    /// recorded when the answer completes.
    pub async fn ask(&mut self, question: &str, on_token: TokenSink<'_>) -> Result<Answer> {
        let question = sanitize_question(question);
        if question.is_empty() {
            bail!("Question is empty");
        }

        let standalone = self.standalone_question(&question).await?;
        let query = embed_query(self.embedder.as_ref(), &standalone).await?;
        let hits = self
            .store
            .nearest_neighbors(&query, self.top_k, &SearchFilter::repo(&self.repo_path))
            .await?;
        tracing::debug!(hits = hits.len(), "retrieved context");

        let messages = compose_messages(&question, &hits, &self.history);
        let text = self.chat.complete(&messages, on_token).await?;

        self.history.push(Turn {
            question,
            answer: text.clone(),
        });

        let mut sources: Vec<String> = Vec::new();
        for hit in &hits {
            if !sources.contains(&hit.chunk.file_path) {
                sources.push(hit.chunk.file_path.clone());
            }
        }
        Ok(Answer { text, sources })
    }

    /// The question to retrieve with. Without history it is `question`
    /// itself; otherwise the chat model's standalone rewrite, whose tokens
    /// are not streamed to the user.
    async fn standalone_question(&self, question: &str) -> Result<String> {
        if self.history.is_empty() {
            return Ok(question.to_string());
        }
        let messages = condense_messages(question, &self.history);
        let mut discard = |_: &str| {};
        let rewritten = self
            .chat
            .complete(&messages, &mut discard)
            .await
            .context("Failed to condense follow-up question")?;
        let rewritten = sanitize_question(&rewritten);
        if rewritten.is_empty() {
            return Ok(question.to_string());
        }
        tracing::debug!(standalone = %rewritten, "condensed follow-up question");
        Ok(rewritten)
    }
}

/// Messages asking the chat model to turn `question` into a standalone
/// question given the history window.
pub fn condense_messages(question: &str, history: &ConversationState) -> Vec<ChatMessage> {
    let mut transcript = String::new();
    for turn in history.turns() {
        transcript.push_str(&format!("Human: {}\nAssistant: {}\n", turn.question, turn.answer));
    }
    vec![
        ChatMessage::new(Role::System, CONDENSE_PROMPT),
        ChatMessage::new(
            Role::User,
            format!(
                "Conversation:\n{}\nFollow-up question: {}\nStandalone question:",
                transcript, question
            ),
        ),
    ]
}

/// Build the message list sent to the chat model: system instructions with
/// the retrieved context, the history window oldest first, then the
/// question.
pub fn compose_messages(
    question: &str,
    hits: &[ChunkHit],
    history: &ConversationState,
) -> Vec<ChatMessage> {
    let mut system = String::from(SYSTEM_PROMPT);
    system.push_str("\n\nContext:\n");
    if hits.is_empty() {
        system.push_str("(no matching code was found in the index)\n");
    }
    for hit in hits {
        system.push_str(&format!(
            "=============\nFile: {}\n{}\n",
            hit.chunk.file_path, hit.chunk.content
        ));
    }

    let mut messages = vec![ChatMessage::new(Role::System, system)];
    for turn in history.turns() {
        messages.push(ChatMessage::new(Role::User, turn.question.clone()));
        messages.push(ChatMessage::new(Role::Assistant, turn.answer.clone()));
    }
    messages.push(ChatMessage::new(Role::User, question));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::testing::HashEmbedder;
    use crate::models::NewChunk;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with the queued replies in order, then with a fixed answer in
    /// two tokens. Records every prompt.
    struct EchoChat {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        replies: Mutex<VecDeque<String>>,
    }

    impl EchoChat {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                replies: Mutex::new(VecDeque::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for EchoChat {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, messages: &[ChatMessage], on_token: TokenSink<'_>) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let queued = self.replies.lock().unwrap().pop_front();
            if let Some(reply) = queued {
                on_token(&reply);
                return Ok(reply);
            }
            on_token("an ");
            on_token("answer");
            Ok("an answer".to_string())
        }
    }

    /// [`HashEmbedder`] that remembers what it was asked to embed.
    struct RecordingEmbedder {
        inner: HashEmbedder,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn dims(&self) -> usize {
            self.inner.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.seen.lock().unwrap().extend(texts.iter().cloned());
            self.inner.embed(texts).await
        }
    }

    fn turn(i: usize) -> Turn {
        Turn {
            question: format!("q{}", i),
            answer: format!("a{}", i),
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut state = ConversationState::new(3);
        for i in 0..5 {
            state.push(turn(i));
        }
        let questions: Vec<&str> = state.turns().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4"]);
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_sanitize_question() {
        assert_eq!(sanitize_question("  how does\n  the\r\nparser work?  "), "how does the parser work?");
        assert_eq!(sanitize_question(" \n \n"), "");
    }

    #[test]
    fn test_input_parse() {
        assert_eq!(Input::parse(" EXIT "), Input::Exit);
        assert_eq!(Input::parse("update"), Input::Update);
        assert_eq!(Input::parse("   "), Input::Empty);
        assert_eq!(
            Input::parse("update the docs?"),
            Input::Question("update the docs?".to_string())
        );
    }

    #[test]
    fn test_compose_messages_order() {
        let mut history = ConversationState::new(2);
        history.push(turn(1));
        let hits = vec![ChunkHit {
            chunk: crate::models::IndexedChunk {
                id: "c1".to_string(),
                repo_path: "/repo".to_string(),
                file_path: "/repo/src/lib.rs".to_string(),
                commit_hash: "r1".to_string(),
                chunk_index: 0,
                content: "pub fn parse() {}".to_string(),
            },
            distance: 0.1,
        }];
        let messages = compose_messages("what parses?", &hits, &history);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("/repo/src/lib.rs"));
        assert!(messages[0].content.contains("pub fn parse() {}"));
        assert_eq!(messages[1].content, "q1");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[3].content, "what parses?");
    }

    #[tokio::test]
    async fn test_ask_streams_and_records_turn() {
        let embedder = Arc::new(HashEmbedder { dims: 16 });
        let store = Arc::new(InMemoryStore::new());
        let mut records = Vec::new();
        for (repo, file, content) in [
            ("/repo", "/repo/src/parser.rs", "the parser reads tokens"),
            ("/other", "/other/src/parser.rs", "the parser reads tokens too"),
        ] {
            let vector = embedder.embed(&[content.to_string()]).await.unwrap().remove(0);
            records.push(NewChunk {
                id: format!("{}-0", file),
                repo_path: repo.to_string(),
                file_path: file.to_string(),
                commit_hash: "r1".to_string(),
                chunk_index: 0,
                content: content.to_string(),
                hash: String::new(),
                vector,
            });
        }
        store.insert_many(&records).await.unwrap();

        let chat = Arc::new(EchoChat::new());
        let mut session = ChatSession::new("/repo", store, embedder, chat.clone(), 4, 2);

        let mut streamed = String::new();
        let mut sink = |t: &str| streamed.push_str(t);
        let answer = session.ask("how does the\nparser work?", &mut sink).await.unwrap();

        assert_eq!(streamed, "an answer");
        assert_eq!(answer.text, "an answer");
        assert_eq!(answer.sources, vec!["/repo/src/parser.rs".to_string()]);
        assert_eq!(session.history().len(), 1);
        assert_eq!(
            session.history().turns().next().unwrap().question,
            "how does the parser work?"
        );

        let seen = chat.seen.lock().unwrap();
        assert!(!seen[0][0].content.contains("/other/"));
    }

    #[tokio::test]
    async fn test_first_question_is_embedded_as_asked() {
        let embedder = Arc::new(RecordingEmbedder {
            inner: HashEmbedder { dims: 16 },
            seen: Mutex::new(Vec::new()),
        });
        let chat = Arc::new(EchoChat::new());
        let mut session = ChatSession::new(
            "/repo",
            Arc::new(InMemoryStore::new()),
            embedder.clone(),
            chat.clone(),
            4,
            2,
        );

        let mut sink = |_: &str| {};
        session.ask("where is the parser?", &mut sink).await.unwrap();

        assert_eq!(*embedder.seen.lock().unwrap(), vec!["where is the parser?".to_string()]);
        assert_eq!(chat.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_is_condensed_before_retrieval() {
        let embedder = Arc::new(RecordingEmbedder {
            inner: HashEmbedder { dims: 16 },
            seen: Mutex::new(Vec::new()),
        });
        let chat = Arc::new(EchoChat::new());
        let mut session = ChatSession::new(
            "/repo",
            Arc::new(InMemoryStore::new()),
            embedder.clone(),
            chat.clone(),
            4,
            2,
        );

        let mut first = |_: &str| {};
        session.ask("where is the parser?", &mut first).await.unwrap();

        chat.replies
            .lock()
            .unwrap()
            .push_back("Where is the parser tested?".to_string());
        let mut streamed = String::new();
        let mut sink = |t: &str| streamed.push_str(t);
        let answer = session.ask("and where is it tested?", &mut sink).await.unwrap();

        assert_eq!(
            *embedder.seen.lock().unwrap(),
            vec![
                "where is the parser?".to_string(),
                "Where is the parser tested?".to_string(),
            ]
        );
        // The rewrite is not streamed; only the answer is.
        assert_eq!(streamed, "an answer");
        assert_eq!(answer.text, "an answer");

        let seen = chat.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        let condense = &seen[1];
        assert_eq!(condense[0].content, CONDENSE_PROMPT);
        assert!(condense[1].content.contains("Human: where is the parser?"));
        assert!(condense[1].content.contains("Follow-up question: and where is it tested?"));
        // The answer prompt still carries the question as the user asked it.
        assert_eq!(seen[2].last().unwrap().content, "and where is it tested?");
        assert_eq!(
            session.history().turns().last().unwrap().question,
            "and where is it tested?"
        );
    }
}
