//! The chat session: message log, in-flight request, upload and
//! connection state.
//!
//! A session is driven from one task. Streaming answers are produced by
//! [`drive_stream`], which may run on another task and reports back through
//! [`SessionEvent`]s; the session applies them in arrival order. Each send
//! gets a fresh stream id, and events from any stream other than the live
//! one are ignored, so an aborted or superseded stream can never touch the
//! message log.

use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::api::{HealthResponse, RagClient, ResetResponse, StatusResponse, UploadResponse};
use crate::cache::MessageCache;
use crate::error::ApiError;
use crate::state::{ChatMessage, ChatRole, ChatState, ConnectionStatus};
use crate::stream::{LineMode, StreamEnvelope};

pub const FAILURE_MESSAGE: &str = "**Error:** Failed to get response. Please try again.";
pub const UPLOAD_INDEXING: &str = "Indexing Document...";
pub const UPLOAD_READY: &str = "Document Ready!";
pub const UPLOAD_FAILED: &str = "Upload Failed";

const UPLOAD_READY_TTL: Duration = Duration::from_secs(3);

/// Cancels the live stream. Cloneable so another task can abort a send
/// that is being driven inline.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
    stream_id: u64,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }
}

/// Everything [`drive_stream`] needs to run one send.
#[derive(Debug)]
pub struct SendTicket {
    pub stream_id: u64,
    pub question: String,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// The service accepted the question; the answer placeholder goes in.
    Opened,
    Envelope(StreamEnvelope),
    Finished,
    Failed(ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub stream_id: u64,
    pub update: StreamUpdate,
}

pub struct ChatSession {
    state: ChatState,
    cache: MessageCache,
    abort: Option<AbortHandle>,
    next_stream_id: u64,
    line_mode: LineMode,
    upload_status_expires: Option<Instant>,
}

impl ChatSession {
    /// Seed the session from the durable cache.
    pub fn new(cache: MessageCache, line_mode: LineMode) -> Self {
        let cached = cache.load();
        debug!(
            messages = cached.messages.len(),
            filename = ?cached.uploaded_filename,
            "restored cached session"
        );
        let state = ChatState {
            messages: cached.messages,
            uploaded_filename: cached.uploaded_filename,
            ..ChatState::default()
        };
        Self {
            state,
            cache,
            abort: None,
            next_stream_id: 0,
            line_mode,
            upload_status_expires: None,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.state.messages
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading
    }

    pub fn line_mode(&self) -> LineMode {
        self.line_mode
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort.clone()
    }

    // Sending

    /// Record the question and hand out a ticket for the stream that will
    /// answer it. Any stream still running is aborted first. Blank input
    /// is ignored.
    pub fn begin_send(&mut self, text: &str) -> Option<SendTicket> {
        if text.trim().is_empty() {
            return None;
        }

        self.abort();
        self.next_stream_id += 1;
        let stream_id = self.next_stream_id;
        let cancel = CancellationToken::new();
        self.abort = Some(AbortHandle {
            token: cancel.clone(),
            stream_id,
        });

        self.state.messages.push(ChatMessage::user(text));
        self.state.sources.clear();
        self.state.is_loading = true;
        self.persist_messages();

        Some(SendTicket {
            stream_id,
            question: text.to_string(),
            cancel,
        })
    }

    /// Send `text` and apply the answer as it streams in. Returns once the
    /// stream finishes, fails, or is aborted through an [`AbortHandle`].
    pub async fn send_message(&mut self, client: &RagClient, text: &str) {
        let Some(ticket) = self.begin_send(text) else {
            return;
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = drive_stream(client.clone(), ticket, self.line_mode, tx);
        let apply = async {
            while let Some(event) = rx.recv().await {
                self.apply(event);
            }
        };
        tokio::join!(driver, apply);
    }

    pub fn apply(&mut self, event: SessionEvent) {
        let live = self.abort.as_ref().map(AbortHandle::stream_id);
        if live != Some(event.stream_id) {
            trace!(stream_id = event.stream_id, ?live, "ignoring event from stale stream");
            return;
        }

        match event.update {
            StreamUpdate::Opened => {
                self.state.messages.push(ChatMessage::assistant(""));
                self.persist_messages();
            }
            StreamUpdate::Envelope(StreamEnvelope::Token(token)) => {
                self.trailing_assistant().content.push_str(&token);
                // Blocking write per token; the cache holds at most `limit` messages.
                self.persist_messages();
            }
            StreamUpdate::Envelope(StreamEnvelope::Error(message)) => {
                self.trailing_assistant()
                    .content
                    .push_str(&format!("\n\n**Error:** {}", message));
                self.persist_messages();
            }
            StreamUpdate::Envelope(StreamEnvelope::Sources(sources)) => {
                self.state.sources = sources;
            }
            StreamUpdate::Finished => self.finish_stream(),
            StreamUpdate::Failed(err) if err.is_abort() => self.finish_stream(),
            StreamUpdate::Failed(err) => {
                warn!(%err, "chat stream failed");
                self.state.messages.push(ChatMessage::assistant(FAILURE_MESSAGE));
                self.persist_messages();
                self.finish_stream();
            }
        }
    }

    fn trailing_assistant(&mut self) -> &mut ChatMessage {
        let has_assistant = matches!(
            self.state.messages.last(),
            Some(msg) if msg.role == ChatRole::Assistant
        );
        if !has_assistant {
            self.state.messages.push(ChatMessage::assistant(""));
        }
        let last = self.state.messages.len() - 1;
        &mut self.state.messages[last]
    }

    fn finish_stream(&mut self) {
        self.abort = None;
        self.state.is_loading = false;
    }

    /// Cancel the live stream, keeping whatever it already produced.
    /// Returns false when nothing was in flight.
    pub fn abort(&mut self) -> bool {
        match self.abort.take() {
            Some(handle) => {
                debug!(stream_id = handle.stream_id, "aborting chat stream");
                handle.abort();
                self.state.is_loading = false;
                true
            }
            None => false,
        }
    }

    // Session resets

    /// Discard document and conversation on the server, then locally.
    /// Local state is left untouched when the server refuses.
    pub async fn new_chat(&mut self, client: &RagClient) -> Result<ResetResponse, ApiError> {
        self.abort();
        let result = client.reset_session().await;
        match &result {
            Ok(_) => {
                self.state.messages.clear();
                self.state.sources.clear();
                self.state.uploaded_filename = None;
                self.cache.purge();
            }
            Err(err) => warn!(%err, "failed to reset session"),
        }
        result
    }

    /// Discard the conversation but keep the indexed document.
    pub async fn clear_chat(&mut self, client: &RagClient) -> Result<ResetResponse, ApiError> {
        self.abort();
        let result = client.clear_chat().await;
        match &result {
            Ok(_) => {
                self.state.messages.clear();
                self.state.sources.clear();
                self.persist_messages();
            }
            Err(err) => warn!(%err, "failed to clear chat"),
        }
        result
    }

    // Uploads

    pub fn begin_upload(&mut self) {
        self.state.is_uploading = true;
        self.set_upload_status(UPLOAD_INDEXING, None);
    }

    pub fn finish_upload(
        &mut self,
        file_name: &str,
        result: Result<UploadResponse, ApiError>,
        now: Instant,
    ) {
        self.state.is_uploading = false;
        match result {
            Ok(response) => {
                info!(
                    file_name,
                    status = %response.status,
                    chunks = response.chunks,
                    "document indexed"
                );
                self.set_upload_status(UPLOAD_READY, Some(now + UPLOAD_READY_TTL));
                self.state.uploaded_filename = Some(file_name.to_string());
                self.cache.save_filename(Some(file_name));
            }
            Err(err) => {
                warn!(%err, file_name, "upload failed");
                self.set_upload_status(UPLOAD_FAILED, None);
            }
        }
    }

    pub async fn upload_document(&mut self, client: &RagClient, path: &Path) {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.begin_upload();
        let result = client.upload_path(path).await;
        self.finish_upload(&file_name, result, Instant::now());
    }

    fn set_upload_status(&mut self, status: &str, expires: Option<Instant>) {
        self.state.upload_status = status.to_string();
        self.upload_status_expires = expires;
    }

    /// Expire transient status text.
    pub fn tick(&mut self, now: Instant) {
        if let Some(expires) = self.upload_status_expires {
            if now >= expires {
                self.state.upload_status.clear();
                self.upload_status_expires = None;
            }
        }
    }

    // Reconciliation with the server

    /// The server's history replaces the local log, including when it is
    /// empty. A conversation only held locally is lost when an empty
    /// history arrives.
    pub fn reconcile_history(&mut self, server: Vec<ChatMessage>) {
        debug!(
            local = self.state.messages.len(),
            server = server.len(),
            "reconciling history"
        );
        self.state.messages = server;
        self.persist_messages();
    }

    /// A filename reported by the server always wins; `null` keeps ours.
    pub fn apply_status(&mut self, status: StatusResponse) {
        if let Some(filename) = status.filename {
            self.cache.save_filename(Some(&filename));
            self.state.uploaded_filename = Some(filename);
        }
    }

    pub fn apply_health(&mut self, result: Result<HealthResponse, ApiError>) {
        match result {
            Ok(health) => {
                self.state.connection_status = ConnectionStatus::Online;
                if health.version.is_some() {
                    self.state.server_version = health.version;
                }
            }
            Err(err) => {
                debug!(%err, "health check failed");
                self.state.connection_status = ConnectionStatus::Offline;
            }
        }
    }

    /// Fetch history and status together and apply whichever succeeded.
    pub async fn sync(&mut self, client: &RagClient) {
        let (history, status) = client.fetch_snapshot().await;
        self.apply_snapshot(history, status);
    }

    pub fn apply_snapshot(
        &mut self,
        history: Result<Vec<ChatMessage>, ApiError>,
        status: Result<StatusResponse, ApiError>,
    ) {
        match history {
            Ok(history) => self.reconcile_history(history),
            Err(err) => warn!(%err, "failed to fetch history"),
        }
        match status {
            Ok(status) => self.apply_status(status),
            Err(err) => warn!(%err, "failed to fetch status"),
        }
    }

    pub async fn refresh_health(&mut self, client: &RagClient) {
        let result = client.check_health().await;
        self.apply_health(result);
    }

    fn persist_messages(&mut self) {
        self.cache.save_messages(&self.state.messages);
    }
}

/// Run one send: open the stream, decode it, and report every step on
/// `tx`. Cancellation is checked at each chunk read; a cancelled stream
/// reports `Failed(ApiError::Aborted)`.
pub async fn drive_stream(
    client: RagClient,
    ticket: SendTicket,
    mode: LineMode,
    tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let SendTicket {
        stream_id,
        question,
        cancel,
    } = ticket;
    let report = |update: StreamUpdate| {
        let _ = tx.send(SessionEvent { stream_id, update });
    };

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Aborted),
        opened = client.send_chat_message(&question) => opened,
    };
    let stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            report(StreamUpdate::Failed(err));
            return;
        }
    };
    report(StreamUpdate::Opened);

    let mut envelopes = Box::pin(stream.envelopes(mode, Some(cancel)));
    while let Some(item) = envelopes.next().await {
        match item {
            Ok(envelope) => report(StreamUpdate::Envelope(envelope)),
            Err(err) => {
                report(StreamUpdate::Failed(err));
                return;
            }
        }
    }
    report(StreamUpdate::Finished);
}
