use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::app::{App, AppEvent, Screen};
use crate::ui::widgets::{status_color, SessionListWidget};

/// Render the session list screen
pub fn render(app: &App, frame: &mut Frame) {
    let area = frame.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Title
            Constraint::Min(10),    // Main content
            Constraint::Length(3),  // Status/help bar
        ])
        .split(area);

    render_title(app, chunks[0], frame);

    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[1]);

    SessionListWidget::new(app).render(main_chunks[0], frame.buffer_mut());
    render_details(app, main_chunks[1], frame);

    render_help_bar(app, chunks[2], frame);
}

fn render_title(app: &App, area: Rect, frame: &mut Frame) {
    let (state, state_color) = if app.connected {
        ("connected", Color::Green)
    } else if app.loading {
        ("connecting...", Color::Yellow)
    } else {
        ("offline", Color::Red)
    };

    let title = Paragraph::new(vec![Line::from(vec![
        Span::styled(
            " Session Launcher ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("{} ", app.config.connection.endpoint),
            Style::default().fg(Color::Gray),
        ),
        Span::styled(format!("[{}]", state), Style::default().fg(state_color)),
        Span::styled(
            format!("  project: {}", app.config.project),
            Style::default().fg(Color::Gray),
        ),
    ])])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    )
    .alignment(Alignment::Center);

    frame.render_widget(title, area);
}

fn render_details(app: &App, area: Rect, frame: &mut Frame) {
    let block = Block::default()
        .title(" Details ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let Some(session) = app.sessions.get(app.selected_session) else {
        let hint = Paragraph::new("Select a session to see its details.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(hint, area);
        return;
    };

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Yellow));
    let lines = vec![
        Line::from(vec![label("Name:     "), Span::raw(session.name.as_str())]),
        Line::from(vec![label("ID:       "), Span::raw(session.id.as_str())]),
        Line::from(vec![
            label("Status:   "),
            Span::styled(
                session.status.as_str(),
                Style::default().fg(status_color(&session.status)),
            ),
        ]),
        Line::from(vec![label("Type:     "), Span::raw(session.session_type.as_str())]),
        Line::from(vec![label("Image:    "), Span::raw(session.image.as_str())]),
        Line::from(vec![
            label("Created:  "),
            Span::raw(session.created_at.as_deref().unwrap_or("-")),
        ]),
    ];

    let details = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(block);
    frame.render_widget(details, area);
}

fn render_help_bar(app: &App, area: Rect, frame: &mut Frame) {
    let mut hints = vec![
        Span::styled(" [n]", Style::default().fg(Color::Yellow)),
        Span::raw(" New session "),
        Span::styled(" [r]", Style::default().fg(Color::Yellow)),
        Span::raw(" Refresh "),
        Span::styled(" [p]", Style::default().fg(Color::Yellow)),
        Span::raw(" Project "),
        Span::styled(" [?]", Style::default().fg(Color::Yellow)),
        Span::raw(" Help "),
        Span::styled(" [q]", Style::default().fg(Color::Yellow)),
        Span::raw(" Quit "),
    ];

    if let Some(ref msg) = app.status_message {
        hints.clear();
        hints.push(Span::styled(msg.clone(), Style::default().fg(Color::Green)));
    }

    let help = Paragraph::new(Line::from(hints))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .alignment(Alignment::Center);

    frame.render_widget(help, area);
}

pub fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
        KeyCode::Char('k') | KeyCode::Up => app.select_prev(),
        KeyCode::Char('n') | KeyCode::Enter => app.open_launcher(),
        KeyCode::Char('r') => {
            if app.connected {
                app.dispatch(AppEvent::SessionListRefreshed);
            } else {
                app.connect();
            }
        }
        KeyCode::Char('p') => app.cycle_project(1),
        KeyCode::Char('P') => app.cycle_project(-1),
        KeyCode::Char('?') => app.push_screen(Screen::Help),
        _ => {}
    }
    Ok(())
}
