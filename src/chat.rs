//! # Streaming Chat Client
//!
//! Sends one user question to `POST {api_base}/api/chat/stream` and turns the
//! streamed reply into a sequence of [`ChatUpdate`]s: the page's message list,
//! typing indicator, input box and suggestion strip are all projections of
//! that sequence.
//!
//! One turn at a time: a second [`ChatClient::send_message`] while a turn is
//! in flight returns [`TurnOutcome::Ignored`] and changes nothing. Whatever
//! way a turn ends, input is re-enabled by the in-flight guard's `Drop`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::ReviewError;
use crate::markdown::{escape_html, render_markdown, render_plain};
use crate::persona;
use crate::router::generate_id;
use crate::session::Doctor;
use crate::stream::{limit_follow_ups, parse_frame, ChatEvent, FrameDecoder};

pub use crate::catalog::{QuestionCatalog, SuggestedQuestion};

pub const FALLBACK_REPLY: &str =
    "Sorry, the AI assistant cannot respond right now. Please try again later.";
pub const INTERRUPTED_REPLY: &str = "Connection interrupted, please retry.";

// ---------------------------------------------------------------------------
// Wire request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    pub conversation_id: String,
    pub stream: bool,
    /// Persona id; omitted when no doctor has been selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_type: Option<String>,
}

/// `conv_<epoch ms>_<9 base36 chars>`
pub fn new_conversation_id() -> String {
    generate_id("conv_")
}

// ---------------------------------------------------------------------------
// Updates and history
// ---------------------------------------------------------------------------

/// One change to the chat view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatUpdate {
    /// The user's bubble; `html` is the escaped plain text.
    UserMessage { text: String, html: String },
    InputEnabled { enabled: bool },
    SuggestionsHidden,
    Typing { active: bool },
    /// An empty assistant bubble was opened.
    AssistantStarted { avatar: String },
    /// Re-render of the whole accumulated reply. `done` marks the final one.
    AssistantRender { text: String, html: String, done: bool },
    /// The assistant bubble's content was replaced by an error.
    AssistantError { text: String, html: String },
    /// Replace the suggestion strip and show it after the latest bubble.
    ShowSuggestions { questions: Vec<SuggestedQuestion> },
    /// Show the current suggestions after the latest bubble.
    RelocateSuggestions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub text: String,
    pub html: String,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

/// What the view currently shows, rebuilt from updates.
#[derive(Debug, Clone, Serialize)]
pub struct ChatState {
    pub history: Vec<ConversationMessage>,
    pub suggestions: Vec<SuggestedQuestion>,
    pub suggestions_visible: bool,
    pub input_enabled: bool,
    pub typing: bool,
    /// Latest HTML of the in-progress or last assistant bubble.
    pub assistant_html: Option<String>,
}

impl Default for ChatState {
    fn default() -> Self {
        ChatState {
            history: Vec::new(),
            suggestions: Vec::new(),
            suggestions_visible: true,
            input_enabled: true,
            typing: false,
            assistant_html: None,
        }
    }
}

impl ChatState {
    pub fn apply(&mut self, update: &ChatUpdate) {
        match update {
            ChatUpdate::UserMessage { text, html } => self.history.push(ConversationMessage {
                role: Role::User,
                text: text.clone(),
                html: html.clone(),
                is_error: false,
                timestamp: Utc::now(),
            }),
            ChatUpdate::InputEnabled { enabled } => self.input_enabled = *enabled,
            ChatUpdate::SuggestionsHidden => self.suggestions_visible = false,
            ChatUpdate::Typing { active } => self.typing = *active,
            ChatUpdate::AssistantStarted { .. } => self.assistant_html = Some(String::new()),
            ChatUpdate::AssistantRender { text, html, done } => {
                self.assistant_html = Some(html.clone());
                if *done {
                    self.push_assistant(text, html, false);
                }
            }
            ChatUpdate::AssistantError { text, html } => {
                self.assistant_html = Some(html.clone());
                self.push_assistant(text, html, true);
            }
            ChatUpdate::ShowSuggestions { questions } => {
                self.suggestions = questions.clone();
                self.suggestions_visible = true;
            }
            ChatUpdate::RelocateSuggestions => self.suggestions_visible = true,
        }
    }

    fn push_assistant(&mut self, text: &str, html: &str, is_error: bool) {
        self.history.push(ConversationMessage {
            role: Role::Assistant,
            text: text.to_string(),
            html: html.to_string(),
            is_error,
            timestamp: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Turn state machine
// ---------------------------------------------------------------------------

/// State of one assistant reply while it streams in.
///
/// The buffer only ever grows during a turn, so every render is of a prefix
/// of the final text and renders can never go backwards.
#[derive(Debug)]
pub struct TurnState {
    buffer: String,
    render_interval: Duration,
    last_render: Option<Instant>,
    /// Length of `buffer` at the last render.
    rendered_len: usize,
    finished: bool,
    defaults: Vec<SuggestedQuestion>,
}

impl TurnState {
    /// `defaults` are shown when the turn completes without follow-ups.
    pub fn new(render_interval: Duration, defaults: Vec<SuggestedQuestion>) -> Self {
        TurnState {
            buffer: String::new(),
            render_interval,
            last_render: None,
            rendered_len: 0,
            finished: false,
            defaults,
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply(&mut self, event: ChatEvent, now: Instant) -> Vec<ChatUpdate> {
        match event {
            ChatEvent::Init { message } => {
                debug!(?message, "stream initialised");
                Vec::new()
            }
            ChatEvent::Message { content } => {
                if self.finished {
                    debug!("ignoring content after end of turn");
                    return Vec::new();
                }
                if content.is_empty() {
                    return Vec::new();
                }
                self.buffer.push_str(&content);
                self.tick(now).into_iter().collect()
            }
            ChatEvent::FollowUp { questions } => {
                let questions = self.to_suggestions(&questions);
                if questions.is_empty() {
                    return Vec::new();
                }
                vec![ChatUpdate::ShowSuggestions { questions }]
            }
            ChatEvent::Complete { follow_up_questions } => {
                if self.finished {
                    return Vec::new();
                }
                self.finished = true;
                let mut updates = vec![self.render(now, true)];
                let questions = self.to_suggestions(&follow_up_questions);
                let questions = if questions.is_empty() {
                    self.defaults.clone()
                } else {
                    questions
                };
                updates.push(ChatUpdate::InputEnabled { enabled: true });
                updates.push(ChatUpdate::ShowSuggestions { questions });
                updates
            }
            ChatEvent::Error { error } => {
                if self.finished {
                    return Vec::new();
                }
                self.finished = true;
                let text = format!("AI reply error: {}", error);
                vec![
                    ChatUpdate::AssistantError {
                        html: format!("<span class=\"error\">{}</span>", escape_html(&text)),
                        text,
                    },
                    ChatUpdate::InputEnabled { enabled: true },
                    ChatUpdate::RelocateSuggestions,
                ]
            }
            ChatEvent::Unknown { kind } => {
                debug!(%kind, "ignoring unknown event");
                Vec::new()
            }
        }
    }

    /// Render if there is unrendered text and the interval has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<ChatUpdate> {
        if self.finished || self.rendered_len == self.buffer.len() {
            return None;
        }
        let due = match self.last_render {
            None => true,
            Some(last) => now.duration_since(last) >= self.render_interval,
        };
        if due {
            Some(self.render(now, false))
        } else {
            None
        }
    }

    /// The body ended. Without a terminal event, the accumulated text is
    /// still rendered one last time.
    pub fn finish_stream(&mut self, now: Instant) -> Vec<ChatUpdate> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![self.render(now, true), ChatUpdate::RelocateSuggestions]
    }

    /// The body failed mid-read.
    pub fn interrupt(&mut self) -> Vec<ChatUpdate> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![
            ChatUpdate::AssistantError {
                text: INTERRUPTED_REPLY.to_string(),
                html: escape_html(INTERRUPTED_REPLY),
            },
            ChatUpdate::RelocateSuggestions,
        ]
    }

    fn render(&mut self, now: Instant, done: bool) -> ChatUpdate {
        self.last_render = Some(now);
        self.rendered_len = self.buffer.len();
        ChatUpdate::AssistantRender {
            text: self.buffer.clone(),
            html: render_markdown(&self.buffer),
            done,
        }
    }

    /// Ids are the current epoch millis plus the question's index.
    fn to_suggestions(&self, questions: &[String]) -> Vec<SuggestedQuestion> {
        let base = Utc::now().timestamp_millis().max(0) as u64;
        limit_follow_ups(questions)
            .into_iter()
            .enumerate()
            .map(|(i, text)| SuggestedQuestion { id: base + i as u64, text })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input, or a turn was already in flight.
    Ignored,
    Completed,
    /// The body failed after streaming had started.
    Interrupted,
    Aborted,
}

pub struct ChatClient {
    http: reqwest::Client,
    api_base: String,
    render_interval: Duration,
    /// Bound on connecting and receiving the response head. The streamed
    /// body itself is not time-limited.
    request_timeout: Duration,
    doctor: Option<Doctor>,
    catalog: QuestionCatalog,
    user_id: String,
    conversation_id: String,
    in_flight: AtomicBool,
    abort: Notify,
    state: Mutex<ChatState>,
    /// When set, every update is forwarded here after being applied to the
    /// client's own [`ChatState`].
    pub update_tx: Option<mpsc::UnboundedSender<ChatUpdate>>,
}

/// Clears the in-flight flag and re-enables input however the turn ends.
struct InFlightGuard<'a> {
    client: &'a ChatClient,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.client.in_flight.store(false, Ordering::SeqCst);
        self.client.emit(ChatUpdate::InputEnabled { enabled: true });
    }
}

impl ChatClient {
    pub fn new(
        config: &AppConfig,
        doctor: Option<Doctor>,
        catalog: QuestionCatalog,
    ) -> Result<Self, ReviewError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;
        let client = ChatClient {
            http,
            api_base: config.api_base().to_string(),
            render_interval: config.render_interval(),
            request_timeout: config.request_timeout(),
            doctor,
            catalog,
            user_id: format!("web_user_{}", Utc::now().timestamp_millis()),
            conversation_id: new_conversation_id(),
            in_flight: AtomicBool::new(false),
            abort: Notify::new(),
            state: Mutex::new(ChatState::default()),
            update_tx: None,
        };
        let initial = client.default_suggestions();
        client.emit(ChatUpdate::ShowSuggestions { questions: initial });
        Ok(client)
    }

    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<ChatUpdate>) -> Self {
        self.update_tx = Some(tx);
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn avatar(&self) -> &'static str {
        persona::avatar_for(self.doctor.as_ref())
    }

    /// Snapshot of the current view state.
    pub fn state(&self) -> ChatState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().map(|s| s.history.len()).unwrap_or(0)
    }

    /// Catalog questions for the selected doctor.
    pub fn default_suggestions(&self) -> Vec<SuggestedQuestion> {
        self.catalog
            .questions_for(self.doctor.as_ref().map(|d| d.id.as_str()))
    }

    /// Cancel the in-flight request, if any.
    pub fn abort(&self) {
        if self.is_in_flight() {
            info!("aborting in-flight chat turn");
            self.abort.notify_waiters();
        }
    }

    pub fn build_request(&self, message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            user_id: self.user_id.clone(),
            conversation_id: self.conversation_id.clone(),
            stream: true,
            doctor_type: self.doctor.as_ref().map(|d| d.id.clone()),
        }
    }

    /// Run one turn.
    ///
    /// A request-level failure (connect error, non-2xx) is shown as a fallback
    /// assistant bubble and also returned so callers can report it.
    pub async fn send_message(&self, text: &str) -> Result<TurnOutcome, ReviewError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("send ignored, a turn is already in flight");
            return Ok(TurnOutcome::Ignored);
        }
        let _guard = InFlightGuard { client: self };

        self.emit(ChatUpdate::InputEnabled { enabled: false });
        self.emit(ChatUpdate::SuggestionsHidden);
        self.emit(ChatUpdate::UserMessage { text: text.to_string(), html: render_plain(text) });
        self.emit(ChatUpdate::Typing { active: true });

        let result = tokio::select! {
            r = self.run_turn(text) => r,
            _ = self.abort.notified() => Err(ReviewError::Aborted),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(ReviewError::Aborted) => {
                self.emit(ChatUpdate::Typing { active: false });
                Ok(TurnOutcome::Aborted)
            }
            Err(e) => {
                warn!(error = %e, "chat request failed");
                self.emit(ChatUpdate::Typing { active: false });
                self.emit(ChatUpdate::AssistantStarted { avatar: self.avatar().to_string() });
                self.emit(ChatUpdate::AssistantError {
                    text: FALLBACK_REPLY.to_string(),
                    html: escape_html(FALLBACK_REPLY),
                });
                self.emit(ChatUpdate::RelocateSuggestions);
                Err(e)
            }
        }
    }

    async fn run_turn(&self, text: &str) -> Result<TurnOutcome, ReviewError> {
        let url = format!("{}/api/chat/stream", self.api_base);
        let request = self.build_request(text);
        debug!(%url, conversation_id = %request.conversation_id, "opening chat stream");

        let pending = self.http.post(&url).json(&request).send();
        let response = tokio::time::timeout(self.request_timeout, pending)
            .await
            .map_err(|_| ReviewError::Timeout(self.request_timeout))??;
        let status = response.status();
        if !status.is_success() {
            return Err(ReviewError::Http { status: status.as_u16(), url });
        }

        self.emit(ChatUpdate::Typing { active: false });
        self.emit(ChatUpdate::AssistantStarted { avatar: self.avatar().to_string() });

        let mut turn = TurnState::new(self.render_interval, self.default_suggestions());
        let mut decoder = FrameDecoder::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "chat stream interrupted");
                    self.emit_all(turn.interrupt());
                    return Ok(TurnOutcome::Interrupted);
                }
            };
            for block in decoder.push(&chunk) {
                self.handle_block(&mut turn, &block);
            }
            // The terminal event ends the turn even if the server keeps the
            // connection open.
            if turn.is_finished() {
                debug!("terminal event received, closing chat stream");
                break;
            }
            if let Some(update) = turn.tick(Instant::now()) {
                self.emit(update);
            }
        }
        if !turn.is_finished() {
            if let Some(block) = decoder.finish() {
                self.handle_block(&mut turn, &block);
            }
        }
        self.emit_all(turn.finish_stream(Instant::now()));
        info!(chars = turn.text().chars().count(), "chat turn finished");
        Ok(TurnOutcome::Completed)
    }

    fn handle_block(&self, turn: &mut TurnState, block: &str) {
        match parse_frame(block) {
            Ok(Some(event)) => self.emit_all(turn.apply(event, Instant::now())),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping malformed frame"),
        }
    }

    fn emit_all(&self, updates: Vec<ChatUpdate>) {
        for update in updates {
            self.emit(update);
        }
    }

    fn emit(&self, update: ChatUpdate) {
        if let Ok(mut state) = self.state.lock() {
            state.apply(&update);
        }
        match &self.update_tx {
            Some(tx) => {
                let _ = tx.send(update);
            }
            None => debug!(?update, "chat update"),
        }
    }
}
