use std::path::PathBuf;
use std::time::Instant;

use docchat_core::{drive_stream, ChatSession, ChatState, Platform, RagClient, SessionEvent};
use ratatui::layout::Rect;
use tokio::sync::mpsc;
use tracing::debug;

use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
    UploadPath,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub platform: Platform,

    // Question input
    pub input: String,
    pub input_cursor: usize, // cursor position in input, in chars

    // Upload prompt
    pub upload_input: String,
    pub upload_cursor: usize,

    // Chat view
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub follow_tail: bool,
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Data
    pub session: ChatSession,
    pub client: RagClient,
    events: mpsc::UnboundedSender<AppEvent>,
    session_events: mpsc::UnboundedSender<SessionEvent>,
}

impl App {
    pub fn new(
        session: ChatSession,
        client: RagClient,
        events: mpsc::UnboundedSender<AppEvent>,
        session_events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            platform: Platform::current(),

            input: String::new(),
            input_cursor: 0,

            upload_input: String::new(),
            upload_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_tail: true,
            chat_area: None,

            animation_frame: 0,

            session,
            client,
            events,
            session_events,
        }
    }

    pub fn state(&self) -> &ChatState {
        self.session.state()
    }

    /// Fetch server history and status in the background.
    pub fn start_sync(&self) {
        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let (history, status) = client.fetch_snapshot().await;
            let _ = tx.send(AppEvent::Synced { history, status });
        });
    }

    pub fn start_health_check(&self) {
        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client.check_health().await;
            let _ = tx.send(AppEvent::Health(result));
        });
    }

    /// Send the typed question and stream the answer in the background.
    pub fn submit_question(&mut self) {
        if self.state().is_loading {
            return;
        }
        let question = std::mem::take(&mut self.input);
        self.input_cursor = 0;

        let Some(ticket) = self.session.begin_send(&question) else {
            return;
        };
        debug!(stream_id = ticket.stream_id, "spawning chat stream");
        let client = self.client.clone();
        let mode = self.session.line_mode();
        let tx = self.session_events.clone();
        tokio::spawn(drive_stream(client, ticket, mode, tx));

        self.follow_tail = true;
        self.scroll_to_bottom();
    }

    /// Upload the path typed into the upload prompt in the background.
    pub fn submit_upload(&mut self) {
        let raw = self.upload_input.trim();
        if raw.is_empty() || self.state().is_uploading {
            return;
        }
        let path = expand_home(raw);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.session.begin_upload();
        self.input_mode = InputMode::Editing;

        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client.upload_path(&path).await;
            let _ = tx.send(AppEvent::Uploaded { file_name, result });
        });
    }

    pub async fn new_chat(&mut self) {
        if self.session.new_chat(&self.client).await.is_err() {
            return;
        }
        self.input.clear();
        self.input_cursor = 0;
        self.upload_input.clear();
        self.upload_cursor = 0;
        self.chat_scroll = 0;
        self.follow_tail = true;
    }

    pub async fn clear_chat(&mut self) {
        if self.session.clear_chat(&self.client).await.is_err() {
            return;
        }
        self.chat_scroll = 0;
        self.follow_tail = true;
    }

    pub fn abort(&mut self) {
        self.session.abort();
    }

    /// Tick animation frame and expire transient status text
    pub fn tick(&mut self) {
        if self.state().is_loading || self.state().is_uploading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        self.session.tick(Instant::now());
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
        let bottom = self.bottom_scroll();
        if self.chat_scroll >= bottom {
            self.chat_scroll = bottom;
            self.follow_tail = true;
        }
    }

    /// Scroll chat to bottom so the latest tokens are visible
    pub fn scroll_to_bottom(&mut self) {
        self.chat_scroll = self.bottom_scroll();
    }

    fn bottom_scroll(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in self.session.messages() {
            total_lines = total_lines.saturating_add(1); // Role line ("You:" or "AI:")
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 { 1 } else { (char_count / wrap_width) + 1 };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        // "Thinking..." indicator
        if self.state().is_loading {
            total_lines = total_lines.saturating_add(2);
        }
        if !self.state().sources.is_empty() {
            total_lines = total_lines.saturating_add(self.state().sources.len() as u16 + 1);
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        total_lines.saturating_sub(visible_height)
    }

    pub fn shortcut_hint(&self) -> String {
        docchat_core::shortcuts::hints(self.platform)
            .iter()
            .map(|(keys, action)| format!("{keys} {action}"))
            .collect::<Vec<_>>()
            .join(" · ")
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
