use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, StatefulWidget},
};

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::app::App;
use crate::client::SessionSummary;

const STATUS_WIDTH: usize = 12;

/// Colour of a session status in the list
pub fn status_color(status: &str) -> Color {
    match status {
        "RUNNING" => Color::Green,
        "PENDING" | "SCHEDULED" | "PREPARING" | "PULLING" | "PREPARED" | "CREATING" => {
            Color::Yellow
        }
        "RESTARTING" | "TERMINATING" => Color::Magenta,
        "ERROR" => Color::Red,
        _ => Color::Gray,
    }
}

/// Cut `text` to at most `width` terminal columns, marking the cut with "…"
fn fit_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

/// Session list of the current project
pub struct SessionListWidget<'a> {
    pub sessions: &'a [SessionSummary],
    pub selected: usize,
    pub project: &'a str,
}

impl<'a> SessionListWidget<'a> {
    pub fn new(app: &'a App) -> Self {
        Self {
            sessions: &app.sessions,
            selected: app.selected_session,
            project: &app.config.project,
        }
    }

    pub fn render(self, area: Rect, buf: &mut Buffer) {
        let title = format!(" Sessions in {} ({}) ", self.project, self.sessions.len());

        let items: Vec<ListItem> = if self.sessions.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "No sessions. Press [n] to start one.",
                Style::default().fg(Color::DarkGray),
            )))]
        } else {
            // borders, highlight symbol and status column
            let name_width = (area.width as usize).saturating_sub(4 + STATUS_WIDTH).max(1);
            self.sessions
                .iter()
                .map(|s| {
                    ListItem::new(Line::from(vec![
                        Span::styled(
                            format!("{:width$}", s.status, width = STATUS_WIDTH),
                            Style::default().fg(status_color(&s.status)),
                        ),
                        Span::raw(fit_width(&s.name, name_width)),
                    ]))
                })
                .collect()
        };

        let mut state = ListState::default();
        if !self.sessions.is_empty() {
            state.select(Some(self.selected.min(self.sessions.len() - 1)));
        }

        let list = List::new(items)
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
                    .bg(Color::DarkGray),
            )
            .highlight_symbol("→ ");

        StatefulWidget::render(list, area, buf, &mut state);
    }
}
