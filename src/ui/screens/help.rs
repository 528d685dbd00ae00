use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph},
};

use crate::ui::centered_rect;

/// Render the help screen
pub fn render(frame: &mut Frame) {
    let area = frame.area();
    let dialog_width = 60.min(area.width.saturating_sub(4));
    let dialog_height = 36.min(area.height.saturating_sub(4));

    let dialog_area = centered_rect(dialog_width, dialog_height, area);
    frame.render_widget(Clear, dialog_area);

    let block = Block::default()
        .title(" Help - Key Bindings ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    let inner = block.inner(dialog_area);
    frame.render_widget(block, dialog_area);

    let help_text = vec![
        section("Sessions"),
        Line::from(""),
        key_line("j / Down", "Move selection down"),
        key_line("k / Up", "Move selection up"),
        key_line("n / Enter", "Start a new session"),
        key_line("r", "Refresh the session list"),
        key_line("p / P", "Next / previous project"),
        Line::from(""),
        section("Launcher"),
        Line::from(""),
        key_line("Enter", "Next step / Launch on the last step"),
        key_line("Esc", "Previous step / Close on the first"),
        key_line("j / k", "Move between fields"),
        key_line("Left / Right", "Change the focused value"),
        key_line("Tab", "Type a value into the focused field"),
        key_line("Space", "Toggle / apply template / select folder"),
        key_line("a", "Set mount alias of the folder"),
        key_line("v", "Environment variables and ports"),
        key_line("/", "Filter environments"),
        Line::from(""),
        section("General"),
        Line::from(""),
        key_line("?", "Show this help"),
        key_line("q", "Quit application"),
        key_line("Ctrl+C", "Quit from anywhere"),
        Line::from(""),
        Line::from(Span::styled(
            "Press any key to close",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let para = Paragraph::new(help_text);
    frame.render_widget(para, inner);
}

fn section(title: &str) -> Line<'_> {
    Line::from(Span::styled(
        title,
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    ))
}

fn key_line<'a>(key: &'a str, description: &'a str) -> Line<'a> {
    Line::from(vec![
        Span::styled(
            format!("  {:14}", key),
            Style::default().fg(Color::Green),
        ),
        Span::raw(description),
    ])
}
