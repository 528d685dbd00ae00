//! Environment variable and pre-open port editor

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, StatefulWidget},
};

use crate::app::{App, VariablesSection};
use crate::ui::centered_rect;

/// Render the variables dialog over the launcher
pub fn render(app: &App, frame: &mut Frame) {
    let area = frame.area();
    let dialog_width = 72.min(area.width.saturating_sub(4));
    let dialog_height = 24.min(area.height.saturating_sub(4));

    let dialog_area = centered_rect(dialog_width, dialog_height, area);
    frame.render_widget(Clear, dialog_area);

    let block = Block::default()
        .title(" Environment Variables & Ports ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    let inner = block.inner(dialog_area);
    frame.render_widget(block, dialog_area);

    let Some(ref state) = app.launcher else {
        return;
    };
    let dialog = &app.variables;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Min(6),      // Variables
            Constraint::Length(5),   // Ports
            Constraint::Length(2),   // Help
        ])
        .split(inner);

    // Variables table
    let env_active = dialog.section == VariablesSection::Environment;
    let rows = state.env_vars.rows();
    let items: Vec<ListItem> = if rows.is_empty() {
        vec![ListItem::new(Span::styled(
            "No variables. Press [n] to add one.",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                let editing_row = env_active && dialog.editing && idx == dialog.row;
                let cell = |column: usize, text: &str| {
                    if editing_row && dialog.column == column {
                        Span::styled(
                            format!("{:28}", format!("{}|", dialog.buffer)),
                            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                        )
                    } else if env_active && idx == dialog.row && dialog.column == column {
                        Span::styled(
                            format!("{:28}", text),
                            Style::default().fg(Color::White).add_modifier(Modifier::UNDERLINED),
                        )
                    } else {
                        Span::raw(format!("{:28}", text))
                    }
                };
                ListItem::new(Line::from(vec![
                    cell(0, &row.name),
                    Span::styled(" = ", Style::default().fg(Color::DarkGray)),
                    cell(1, &row.value),
                ]))
            })
            .collect()
    };

    let mut env_state = ListState::default();
    if env_active && !rows.is_empty() {
        env_state.select(Some(dialog.row.min(rows.len() - 1)));
    }
    let env_list = List::new(items)
        .block(
            Block::default()
                .title(format!(" Variables ({}) ", rows.len()))
                .borders(Borders::ALL)
                .border_style(section_style(env_active)),
        )
        .highlight_symbol("→ ");
    StatefulWidget::render(env_list, chunks[0], frame.buffer_mut(), &mut env_state);

    // Ports
    let ports_active = dialog.section == VariablesSection::Ports;
    let mut spans: Vec<Span> = Vec::new();
    for (idx, port) in state.ports.ports().iter().enumerate() {
        let style = if ports_active && idx == dialog.row && !dialog.editing {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        spans.push(Span::styled(format!(" {} ", port), style));
    }
    if ports_active && dialog.editing {
        spans.push(Span::styled(
            format!(" {}|", dialog.buffer),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ));
    } else if spans.is_empty() {
        spans.push(Span::styled(
            "No ports. Press [n] to add one.",
            Style::default().fg(Color::DarkGray),
        ));
    }
    let ports = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .title(format!(
                " Pre-open ports ({}/{}) ",
                state.ports.ports().len(),
                state.ports.max()
            ))
            .borders(Borders::ALL)
            .border_style(section_style(ports_active)),
    );
    frame.render_widget(ports, chunks[1]);

    let help_text = if dialog.editing {
        "[Enter] Done  [Esc] Cancel"
    } else {
        "[Tab] Switch list  [n] Add  [Enter] Edit  [←/→] Column  [d] Delete  [Esc] Close"
    };
    let help = Paragraph::new(help_text)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(help, chunks[2]);
}

fn section_style(active: bool) -> Style {
    if active {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Gray)
    }
}

/// Handle key input for the variables dialog
pub fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    if app.variables.editing {
        return handle_edit_key(app, key);
    }
    let Some(ref mut state) = app.launcher else {
        app.pop_screen();
        return Ok(());
    };
    let dialog = &mut app.variables;

    let len = match dialog.section {
        VariablesSection::Environment => state.env_vars.len(),
        VariablesSection::Ports => state.ports.ports().len(),
    };

    match key.code {
        KeyCode::Esc => {
            let invalid = state.env_vars.validate().err();
            app.pop_screen();
            if let Some(e) = invalid {
                app.set_status(e);
            }
        }
        KeyCode::Tab => {
            dialog.section = match dialog.section {
                VariablesSection::Environment => VariablesSection::Ports,
                VariablesSection::Ports => VariablesSection::Environment,
            };
            dialog.row = 0;
            dialog.column = 0;
        }
        KeyCode::Char('j') | KeyCode::Down => {
            if dialog.row + 1 < len {
                dialog.row += 1;
            }
        }
        KeyCode::Char('k') | KeyCode::Up => {
            dialog.row = dialog.row.saturating_sub(1);
        }
        KeyCode::Left | KeyCode::Right | KeyCode::Char('h') | KeyCode::Char('l') => {
            if dialog.section == VariablesSection::Ports {
                let delta: isize = if matches!(key.code, KeyCode::Right | KeyCode::Char('l')) { 1 } else { -1 };
                dialog.row = (dialog.row as isize + delta).clamp(0, len.saturating_sub(1) as isize) as usize;
            } else {
                dialog.column = 1 - dialog.column.min(1);
            }
        }
        KeyCode::Char('n') | KeyCode::Char('+') => match dialog.section {
            VariablesSection::Environment => {
                dialog.row = state.env_vars.push("", "");
                dialog.column = 0;
                dialog.buffer.clear();
                dialog.editing = true;
            }
            VariablesSection::Ports => {
                dialog.buffer.clear();
                dialog.editing = true;
            }
        },
        KeyCode::Enter => match dialog.section {
            VariablesSection::Environment => {
                if let Some(row) = state.env_vars.rows().get(dialog.row) {
                    dialog.buffer = if dialog.column == 0 {
                        row.name.clone()
                    } else {
                        row.value.clone()
                    };
                    dialog.editing = true;
                }
            }
            VariablesSection::Ports => {
                dialog.buffer.clear();
                dialog.editing = true;
            }
        },
        KeyCode::Char('d') | KeyCode::Delete => {
            match dialog.section {
                VariablesSection::Environment => state.env_vars.remove(dialog.row),
                VariablesSection::Ports => state.ports.remove(dialog.row),
            }
            dialog.row = dialog.row.min(len.saturating_sub(2));
        }
        _ => {}
    }
    Ok(())
}

fn handle_edit_key(app: &mut App, key: KeyEvent) -> Result<()> {
    let Some(ref mut state) = app.launcher else {
        return Ok(());
    };
    let dialog = &mut app.variables;
    let mut message = None;

    match key.code {
        KeyCode::Esc => {
            dialog.editing = false;
            dialog.buffer.clear();
        }
        KeyCode::Enter => {
            match dialog.section {
                VariablesSection::Environment => {
                    if dialog.column == 0 {
                        state.env_vars.set_name(dialog.row, &dialog.buffer);
                        // continue with the value of a freshly named row
                        let value = state
                            .env_vars
                            .rows()
                            .get(dialog.row)
                            .map(|r| r.value.clone())
                            .unwrap_or_default();
                        dialog.column = 1;
                        dialog.buffer = value;
                        return Ok(());
                    }
                    state.env_vars.set_value(dialog.row, &dialog.buffer);
                    if let Err(e) = state.env_vars.validate() {
                        message = Some(e);
                    }
                }
                VariablesSection::Ports => match state.ports.add(&dialog.buffer) {
                    Ok(port) => {
                        dialog.row = state.ports.ports().len().saturating_sub(1);
                        message = Some(format!("Port {} will be pre-opened", port));
                    }
                    Err(e) => message = Some(e),
                },
            }
            dialog.editing = false;
            dialog.buffer.clear();
        }
        KeyCode::Backspace => {
            dialog.buffer.pop();
        }
        KeyCode::Char(c) => {
            dialog.buffer.push(c);
        }
        _ => {}
    }

    if let Some(msg) = message {
        app.set_status(msg);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Screen, VariablesDialog};
    use crate::client::fake::FakeClient;
    use crate::config::Config;
    use crate::launcher::{LauncherData, LauncherState};
    use crate::presets::TemplateStore;
    use crossterm::event::KeyModifiers;
    use std::sync::Arc;

    fn app_in_dialog() -> App {
        let client = FakeClient::default();
        let data = LauncherData::load(&client, "default", None).unwrap();
        let config = Config::default();
        let launcher = LauncherState::new(data, &config, TemplateStore::load_embedded());
        let mut app = App::new(config, Arc::new(client));
        app.launcher = Some(launcher);
        app.push_screen(Screen::Launcher);
        app.variables = VariablesDialog::default();
        app.push_screen(Screen::Variables);
        app
    }

    fn press(app: &mut App, code: KeyCode) {
        handle_key(app, KeyEvent::new(code, KeyModifiers::NONE)).unwrap();
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[test]
    fn test_add_variable_name_then_value() {
        let mut app = app_in_dialog();
        press(&mut app, KeyCode::Char('n'));
        type_text(&mut app, "OMP_NUM_THREADS");
        press(&mut app, KeyCode::Enter);
        type_text(&mut app, "4");
        press(&mut app, KeyCode::Enter);

        let vars = app.launcher.as_ref().unwrap().env_vars.to_map();
        assert_eq!(vars["OMP_NUM_THREADS"], "4");
        assert!(!app.variables.editing);

        press(&mut app, KeyCode::Esc);
        assert_eq!(app.screen, Screen::Launcher);
    }

    #[test]
    fn test_add_port_and_reject_duplicate() {
        let mut app = app_in_dialog();
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Char('n'));
        type_text(&mut app, "8888");
        press(&mut app, KeyCode::Enter);
        press(&mut app, KeyCode::Char('n'));
        type_text(&mut app, "8888");
        press(&mut app, KeyCode::Enter);

        assert_eq!(app.launcher.as_ref().unwrap().ports.ports(), &[8888u16]);
        assert!(app.status_message.as_deref().unwrap_or_default().contains("already"));

        press(&mut app, KeyCode::Char('d'));
        assert!(app.launcher.as_ref().unwrap().ports.ports().is_empty());
    }
}
