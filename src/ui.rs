use docchat_core::session::{UPLOAD_FAILED, UPLOAD_READY};
use docchat_core::{ChatRole, ConnectionStatus};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, InputMode};

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c != '*' || chars.peek() != Some(&'*') {
            current_text.push(c);
            continue;
        }
        chars.next();

        if !current_text.is_empty() {
            spans.push(Span::raw(std::mem::take(&mut current_text)));
        }

        // Find closing **
        let mut bold_text = String::new();
        let mut found_close = false;
        while let Some(c) = chars.next() {
            if c == '*' && chars.peek() == Some(&'*') {
                chars.next();
                found_close = true;
                break;
            }
            bold_text.push(c);
        }

        if found_close && !bold_text.is_empty() {
            spans.push(Span::styled(
                bold_text,
                Style::default().add_modifier(Modifier::BOLD),
            ));
        } else {
            current_text.push_str("**");
            current_text.push_str(&bold_text);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.input_mode == InputMode::UploadPath {
        render_upload_prompt(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.state();

    let connection_color = match state.connection_status {
        ConnectionStatus::Checking => Color::Yellow,
        ConnectionStatus::Online => Color::Green,
        ConnectionStatus::Offline => Color::Red,
    };

    let mut spans = vec![
        Span::styled(" DocChat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled("● ", Style::default().fg(connection_color)),
        Span::styled(
            state.connection_status.label(),
            Style::default().fg(Color::White),
        ),
    ];
    if let Some(version) = &state.server_version {
        spans.push(Span::styled(
            format!(" (server v{})", version),
            Style::default().fg(Color::Gray),
        ));
    }

    if let Some(filename) = &state.uploaded_filename {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("[{}]", filename),
            Style::default().fg(Color::Magenta),
        ));
    }

    if !state.upload_status.is_empty() {
        let color = match state.upload_status.as_str() {
            UPLOAD_READY => Color::Green,
            UPLOAD_FAILED => Color::Red,
            _ => Color::Yellow,
        };
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            state.upload_status.clone(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn thinking_line(frame: u8) -> Line<'static> {
    // Animated ellipsis: cycles through ".", "..", "..."
    let dots = ".".repeat((frame as usize) + 1);
    Line::from(Span::styled(
        format!("Thinking{}", dots),
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    ))
}

fn ai_label() -> Line<'static> {
    Line::from(Span::styled(
        "AI:",
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    ))
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area for mouse hit-testing and scroll calculations
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let state = app.state();
    let title = match &state.uploaded_filename {
        Some(name) => format!(" Chat: {} ", name),
        None => " Chat ".to_string(),
    };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title);

    let chat_text = if state.messages.is_empty() && !state.is_loading {
        let hint = if state.uploaded_filename.is_some() {
            "Ask a question about your document..."
        } else {
            "Upload a PDF (Ctrl+O) and ask questions about it..."
        };
        Text::from(Span::styled(hint, Style::default().fg(Color::DarkGray)))
    } else {
        let mut lines: Vec<Line> = Vec::new();
        let last = state.messages.len().saturating_sub(1);

        for (i, msg) in state.messages.iter().enumerate() {
            match msg.role {
                ChatRole::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                    for line in msg.content.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                ChatRole::Assistant => {
                    lines.push(ai_label());
                    if msg.content.is_empty() && state.is_loading && i == last {
                        lines.push(thinking_line(app.animation_frame));
                    }
                    for line in msg.content.lines() {
                        lines.push(parse_markdown_line(line));
                    }
                }
            }
            lines.push(Line::default());
        }

        // Waiting for the service to accept the question
        let awaiting_open = matches!(state.messages.last(), Some(m) if m.role == ChatRole::User);
        if state.is_loading && awaiting_open {
            lines.push(ai_label());
            lines.push(thinking_line(app.animation_frame));
        }

        if !state.sources.is_empty() {
            lines.push(Line::from(Span::styled(
                "Sources:",
                Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
            )));
            for source in &state.sources {
                lines.push(Line::from(vec![
                    Span::styled(
                        format!("  p.{} ", source.page),
                        Style::default().fg(Color::Magenta),
                    ),
                    Span::styled(source.preview.clone(), Style::default().fg(Color::DarkGray)),
                ]));
            }
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

/// Visible slice of `text` with horizontal scrolling that keeps the cursor in view.
fn visible_input(text: &str, cursor: usize, width: usize) -> (String, usize) {
    let scroll_offset = if width == 0 || cursor < width {
        0
    } else {
        cursor - width + 1
    };
    let visible = text.chars().skip(scroll_offset).take(width).collect();
    (visible, scroll_offset)
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let title = if app.state().is_loading {
        " Ask (Esc to stop) "
    } else {
        " Ask "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let inner_width = area.width.saturating_sub(2) as usize;
    let (visible_text, scroll_offset) = visible_input(&app.input, app.input_cursor, inner_width);

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, area);

    if editing {
        let cursor_x = (app.input_cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
        InputMode::UploadPath => (" UPLOAD ", Style::default().bg(Color::Magenta).fg(Color::White)),
    };

    let keys = match app.input_mode {
        InputMode::Normal => "i:ask  u:upload  j/k:scroll  q:quit",
        InputMode::Editing => "Enter:send  Ctrl+O:upload  Ctrl+L:clear",
        InputMode::UploadPath => "Enter:upload  Esc:cancel",
    };

    let footer = Line::from(vec![
        Span::styled(mode_text, mode_style),
        Span::raw(" "),
        Span::styled(keys, Style::default().fg(Color::Gray)),
        Span::raw("  "),
        Span::styled(app.shortcut_hint(), Style::default().fg(Color::DarkGray)),
    ]);

    frame.render_widget(Paragraph::new(footer), area);
}

fn render_upload_prompt(app: &App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_area = centered_popup(area, 70, 5);
    if popup_area.width < 3 || popup_area.height < 3 {
        return;
    }

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" Upload PDF ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Path to a PDF file. Enter to upload, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    // Short terminals drop the instructions row and keep the input
    let input_row = if inner.height >= 3 { inner.y + 2 } else { inner.y };
    let input_area = Rect::new(inner.x, input_row, inner.width, 1);
    let (visible, scroll_offset) =
        visible_input(&app.upload_input, app.upload_cursor, inner.width as usize);
    frame.render_widget(
        Paragraph::new(visible).style(Style::default().fg(Color::Cyan)),
        input_area,
    );

    let cursor_x = (app.upload_cursor - scroll_offset) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}

/// A popup of at most `width` x `height`, centered and clipped to `area`.
fn centered_popup(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4)).min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width - width) / 2;
    let y = area.y + (area.height - height) / 2;
    Rect::new(x, y, width, height)
}
