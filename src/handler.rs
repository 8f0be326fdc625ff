use std::time::Instant;

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use docchat_core::shortcuts::{self, Key, KeyChord, Shortcut};
use ratatui::layout::Rect;

use crate::app::{App, InputMode};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick(),
        AppEvent::HealthPoll => app.start_health_check(),
        AppEvent::Health(result) => app.session.apply_health(result),
        AppEvent::Synced { history, status } => {
            app.session.apply_snapshot(history, status);
            app.scroll_to_bottom();
        }
        AppEvent::Uploaded { file_name, result } => {
            app.session.finish_upload(&file_name, result, Instant::now());
        }
        AppEvent::Session(event) => {
            app.session.apply(event);
            if app.follow_tail {
                app.scroll_to_bottom();
            }
        }
    }
    Ok(())
}

fn chord(key: &KeyEvent) -> KeyChord {
    let key_code = match key.code {
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Esc => Key::Escape,
        _ => Key::Other,
    };
    KeyChord {
        key: key_code,
        ctrl: key.modifiers.contains(KeyModifiers::CONTROL),
        meta: key.modifiers.contains(KeyModifiers::SUPER),
        shift: key.modifiers.contains(KeyModifiers::SHIFT),
    }
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    if let Some(shortcut) = shortcuts::resolve(&chord(&key), app.platform) {
        match shortcut {
            Shortcut::FocusInput => app.input_mode = InputMode::Editing,
            Shortcut::NewChat => {
                app.new_chat().await;
                app.input_mode = InputMode::Editing;
            }
            Shortcut::Abort => {
                // Esc stops a running answer first; otherwise it leaves the current mode
                if !app.session.abort() {
                    app.input_mode = match app.input_mode {
                        InputMode::UploadPath => InputMode::Editing,
                        _ => InputMode::Normal,
                    };
                }
            }
        }
        return Ok(());
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('l') => {
                app.clear_chat().await;
                return Ok(());
            }
            KeyCode::Char('o') => {
                app.input_mode = InputMode::UploadPath;
                return Ok(());
            }
            _ => {}
        }
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
        InputMode::UploadPath => handle_upload_mode(app, key),
    }

    Ok(())
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Char('i') | KeyCode::Enter => app.input_mode = InputMode::Editing,
        KeyCode::Char('u') => app.input_mode = InputMode::UploadPath,
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::PageDown => app.scroll_down(app.chat_height.max(1)),
        KeyCode::PageUp => app.scroll_up(app.chat_height.max(1)),
        KeyCode::Char('G') | KeyCode::End => {
            app.follow_tail = true;
            app.scroll_to_bottom();
        }
        KeyCode::Char('g') | KeyCode::Home => app.scroll_up(u16::MAX),
        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.submit_question(),
        KeyCode::PageDown => app.scroll_down(app.chat_height.max(1)),
        KeyCode::PageUp => app.scroll_up(app.chat_height.max(1)),
        _ => edit_line(&mut app.input, &mut app.input_cursor, key),
    }
}

fn handle_upload_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.submit_upload(),
        _ => edit_line(&mut app.upload_input, &mut app.upload_cursor, key),
    }
}

/// Single-line editing shared by the question box and the upload prompt.
fn edit_line(text: &mut String, cursor: &mut usize, key: KeyEvent) {
    match key.code {
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            if *cursor < text.chars().count() {
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        KeyCode::Left => *cursor = cursor.saturating_sub(1),
        KeyCode::Right => *cursor = (*cursor + 1).min(text.chars().count()),
        KeyCode::Home => *cursor = 0,
        KeyCode::End => *cursor = text.chars().count(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            let byte_pos = char_to_byte_index(text, *cursor);
            text.insert(byte_pos, c);
            *cursor += 1;
        }
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}
