//! Session launcher dialog
//!
//! A 4-step wizard drawn over the session list: environment, resources,
//! storage folders and a final review. Enter moves forward, Esc moves back.

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, StatefulWidget, Wrap},
};
use std::cmp::Ordering;

use crate::app::{App, ConfirmAction, Screen, VariablesDialog};
use crate::launcher::resources::GIB;
use crate::launcher::{
    format_gib, parse_amount, LauncherState, LauncherStep, ResourceField, SessionType,
};
use crate::presets::TemplateSource;
use crate::ui::centered_rect;
use crate::ui::widgets::Slider;

/// Fields of the environment step, top to bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvField {
    Environment,
    Version,
    Name,
    Type,
    Command,
    StartsAt,
}

fn environment_fields(state: &LauncherState) -> Vec<EnvField> {
    let mut fields = vec![
        EnvField::Environment,
        EnvField::Version,
        EnvField::Name,
        EnvField::Type,
    ];
    if state.session_type == SessionType::Batch {
        fields.extend([EnvField::Command, EnvField::StartsAt]);
    }
    fields
}

/// Fields of the resource step, top to bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResField {
    Template,
    ScalingGroup,
    Amount(ResourceField),
    AcceleratorType,
    ClusterMode,
}

fn resource_fields(state: &LauncherState) -> Vec<ResField> {
    let mut fields = vec![ResField::Template];
    if !state.scaling_groups.is_empty() {
        fields.push(ResField::ScalingGroup);
    }
    fields.extend([
        ResField::Amount(ResourceField::Cpu),
        ResField::Amount(ResourceField::Memory),
        ResField::Amount(ResourceField::SharedMemory),
    ]);
    if !state.resources.limits.accelerators.is_empty() {
        fields.extend([
            ResField::AcceleratorType,
            ResField::Amount(ResourceField::AcceleratorCount),
        ]);
    }
    fields.extend([
        ResField::Amount(ResourceField::ClusterSize),
        ResField::ClusterMode,
        ResField::Amount(ResourceField::SessionCount),
    ]);
    fields
}

fn focused<T: Copy>(fields: &[T], focus: usize) -> Option<T> {
    fields.get(focus.min(fields.len().saturating_sub(1))).copied()
}

/// What the edit buffer is typed into
#[derive(Debug, Clone, PartialEq)]
enum EditTarget {
    Filter,
    Name,
    Command,
    StartsAt,
    Amount(ResourceField),
    Alias(String),
}

fn edit_target(state: &LauncherState) -> Option<EditTarget> {
    match state.current_step() {
        LauncherStep::Environment => {
            match focused(&environment_fields(state), state.field_focus)? {
                EnvField::Environment => Some(EditTarget::Filter),
                EnvField::Name => Some(EditTarget::Name),
                EnvField::Command => Some(EditTarget::Command),
                EnvField::StartsAt => Some(EditTarget::StartsAt),
                EnvField::Version | EnvField::Type => None,
            }
        }
        LauncherStep::Resources => match focused(&resource_fields(state), state.field_focus)? {
            ResField::Amount(field) => Some(EditTarget::Amount(field)),
            _ => None,
        },
        LauncherStep::Folders => state
            .folders
            .name_at_cursor()
            .map(|name| EditTarget::Alias(name.to_string())),
        LauncherStep::Review => None,
    }
}

fn current_text(state: &LauncherState, target: &EditTarget) -> String {
    match target {
        EditTarget::Filter => state.environments.filter.clone(),
        EditTarget::Name => state.session_name.clone(),
        EditTarget::Command => state.startup_command.clone(),
        EditTarget::StartsAt => state.starts_at.clone(),
        EditTarget::Amount(field) => {
            let value = state.resources.value(*field);
            match field {
                ResourceField::Memory | ResourceField::SharedMemory => format_gib(value),
                _ => format!("{}", value),
            }
        }
        EditTarget::Alias(name) => state.folders.alias(name).unwrap_or_default().to_string(),
    }
}

/// Store the edit buffer; returns a message for the status bar
fn commit_edit(state: &mut LauncherState, target: &EditTarget) -> Option<String> {
    let buffer = state.edit_buffer.clone();
    match target {
        EditTarget::Filter => None,
        EditTarget::Name => {
            state.session_name = buffer.trim().to_string();
            None
        }
        EditTarget::Command => {
            state.startup_command = buffer;
            None
        }
        EditTarget::StartsAt => {
            state.starts_at = buffer.trim().to_string();
            None
        }
        EditTarget::Amount(field) => match parse_amount(*field, &buffer) {
            Some(value) => {
                let notices = state.resources.set_requested(*field, value);
                if notices.is_empty() {
                    None
                } else {
                    Some(notices.iter().map(|n| n.to_string()).collect::<Vec<_>>().join("; "))
                }
            }
            None => {
                state.error_message = Some(format!(
                    "{:?} is not a valid amount for {}",
                    buffer.trim(),
                    field.label().to_lowercase()
                ));
                None
            }
        },
        EditTarget::Alias(name) => state.folders.set_alias(name, &buffer).err().map(|n| n.to_string()),
    }
}

/// Narrow the environment list while the filter is typed
fn apply_filter(state: &mut LauncherState) -> Option<String> {
    state.environments.filter = state.edit_buffer.clone();
    let still_visible = state
        .environments
        .selected_id()
        .map(|id| state.environments.visible().iter().any(|e| e.id == id))
        .unwrap_or(false);
    if still_visible {
        None
    } else {
        state.cycle_environment(0).map(|n| n.to_string())
    }
}

/// Render the launcher over the session list
pub fn render(app: &App, frame: &mut Frame) {
    let area = frame.area();

    let dialog_width = 96.min(area.width.saturating_sub(4));
    let dialog_height = 34.min(area.height.saturating_sub(4));

    let dialog_area = centered_rect(dialog_width, dialog_height, area);
    frame.render_widget(Clear, dialog_area);

    let Some(ref state) = app.launcher else {
        return;
    };
    let step = state.current_step();

    let block = Block::default()
        .title(format!(
            " Start Session ({}/{}) - {} ",
            state.wizard.current(),
            state.wizard.total(),
            step.title()
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if step == LauncherStep::Review {
            Color::Green
        } else {
            Color::Cyan
        }))
        .style(Style::default().bg(Color::Black));

    let inner = block.inner(dialog_area);
    frame.render_widget(block, dialog_area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(1),   // Step indicator
            Constraint::Length(1),   // Spacer
            Constraint::Min(10),     // Step content
            Constraint::Length(1),   // Error
            Constraint::Length(2),   // Help
        ])
        .split(inner);

    render_step_indicator(state, frame, chunks[0]);

    match step {
        LauncherStep::Environment => render_step_environment(state, frame, chunks[2]),
        LauncherStep::Resources => render_step_resources(state, frame, chunks[2]),
        LauncherStep::Folders => render_step_folders(state, frame, chunks[2]),
        LauncherStep::Review => render_step_review(state, frame, chunks[2]),
    }

    if let Some(ref error) = state.error_message {
        let error_text = Paragraph::new(error.as_str()).style(Style::default().fg(Color::Red));
        frame.render_widget(error_text, chunks[3]);
    } else if state.launching {
        let launching = Paragraph::new("Launching... please wait")
            .style(Style::default().fg(Color::Yellow));
        frame.render_widget(launching, chunks[3]);
    }

    let help = Paragraph::new(help_text(state))
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(help, chunks[4]);
}

fn help_text(state: &LauncherState) -> String {
    if state.editing {
        return "[Enter] Done  [Esc] Cancel".to_string();
    }
    let mut parts = Vec::new();
    if state.wizard.show_next() {
        parts.push("[Enter] Next");
    } else {
        parts.push("[Enter] Launch");
    }
    if state.wizard.show_prev() {
        parts.push("[Esc] Back");
    } else {
        parts.push("[Esc] Close");
    }
    match state.current_step() {
        LauncherStep::Environment => parts.push("[/] Filter  [Tab] Edit"),
        LauncherStep::Resources => parts.push("[←/→] Adjust  [Tab] Type value"),
        LauncherStep::Folders => parts.push("[Space] Select  [a] Alias  [x] Clear alias"),
        LauncherStep::Review => {}
    }
    parts.push("[v] Variables");
    parts.join("  ")
}

fn render_step_indicator(state: &LauncherState, frame: &mut Frame, area: Rect) {
    let mut spans = Vec::new();
    for step in LauncherStep::ALL {
        if step.number() > 1 {
            spans.push(Span::styled(" ─ ", Style::default().fg(Color::DarkGray)));
        }
        let (marker, style) = match step.number().cmp(&state.wizard.current()) {
            Ordering::Less => ("✓", Style::default().fg(Color::Green)),
            Ordering::Equal => (
                "●",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Ordering::Greater => ("○", Style::default().fg(Color::DarkGray)),
        };
        spans.push(Span::styled(format!("{} {}", marker, step.title()), style));
    }
    let indicator = Paragraph::new(Line::from(spans)).alignment(Alignment::Center);
    frame.render_widget(indicator, area);
}

fn render_field_line(label: &str, value: &str, selected: bool, editing: bool, hint: &str) -> Line<'static> {
    let prefix = if selected { "> " } else { "  " };
    let label_style = Style::default().fg(Color::Yellow);
    let value_style = if editing {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else if selected {
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };
    let hint_style = Style::default().fg(Color::DarkGray);

    Line::from(vec![
        Span::styled(prefix.to_string(), if selected { Style::default().fg(Color::Yellow) } else { Style::default() }),
        Span::styled(format!("{:16}", label), label_style),
        Span::styled(format!("{:24}", value), value_style),
        Span::styled(if selected { format!(" {}", hint) } else { String::new() }, hint_style),
    ])
}

fn render_step_environment(state: &LauncherState, frame: &mut Frame, area: Rect) {
    let h_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(58), Constraint::Percentage(42)])
        .split(area);

    let fields = environment_fields(state);
    let focus = state.field_focus.min(fields.len() - 1);
    let envs = &state.environments;

    let mut lines = vec![
        Line::from(Span::styled(
            "Environment",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];

    for (idx, field) in fields.iter().enumerate() {
        let selected = idx == focus;
        let editing = selected && state.editing;
        let edit_value = format!("{}|", state.edit_buffer);

        let line = match field {
            EnvField::Environment => {
                let value = if editing {
                    format!("/{}", edit_value)
                } else {
                    envs.selected_environment()
                        .map(|e| e.short_name.clone())
                        .unwrap_or_else(|| "(none)".to_string())
                };
                render_field_line("Environment:", &value, selected, editing, "[←/→] Change  [/] Filter")
            }
            EnvField::Version => {
                let value = envs
                    .selected_version()
                    .map(|v| v.label())
                    .unwrap_or_else(|| "(no versions)".to_string());
                let hint = if envs.version_enabled() {
                    format!("[←/→] {} available", envs.versions().len())
                } else {
                    "disabled".to_string()
                };
                render_field_line("Version:", &value, selected, false, &hint)
            }
            EnvField::Name => {
                let value = if editing {
                    edit_value
                } else if state.session_name.is_empty() {
                    "(auto-generated)".to_string()
                } else {
                    state.session_name.clone()
                };
                render_field_line("Session name:", &value, selected, editing, "[Tab] Edit")
            }
            EnvField::Type => render_field_line(
                "Session type:",
                state.session_type.as_str(),
                selected,
                false,
                "[Space] Toggle",
            ),
            EnvField::Command => {
                let value = if editing {
                    edit_value
                } else if state.startup_command.is_empty() {
                    "(required)".to_string()
                } else {
                    state.startup_command.clone()
                };
                render_field_line("Startup command:", &value, selected, editing, "[Tab] Edit")
            }
            EnvField::StartsAt => {
                let value = if editing {
                    edit_value
                } else if state.starts_at.is_empty() {
                    "(now)".to_string()
                } else {
                    state.starts_at.clone()
                };
                render_field_line("Start at:", &value, selected, editing, "RFC 3339 time")
            }
        };
        lines.push(line);
    }

    if let Some(image) = envs.selected_image() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("  {}", image.canonical()),
            Style::default().fg(Color::DarkGray),
        )));
        if let (Some(cpu), Some(mem)) = (image.min_requirement("cpu"), image.min_requirement("mem")) {
            lines.push(Line::from(Span::styled(
                format!("  needs at least {} CPU, {} RAM", cpu, format_gib(mem / GIB)),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }

    frame.render_widget(Paragraph::new(lines), h_chunks[0]);

    let visible = envs.visible();
    let title = if envs.filter.is_empty() {
        format!(" Environments ({}) ", visible.len())
    } else {
        format!(" Environments matching {:?} ({}) ", envs.filter, visible.len())
    };
    let items: Vec<ListItem> = visible
        .iter()
        .map(|e| {
            ListItem::new(Line::from(vec![
                Span::raw(format!("{:16}", e.short_name)),
                Span::styled(e.registry.clone(), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select(
        envs.selected_id()
            .and_then(|id| visible.iter().position(|e| e.id == id)),
    );

    let list = List::new(items)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray)),
        )
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ");
    StatefulWidget::render(list, h_chunks[1], frame.buffer_mut(), &mut list_state);
}

fn remaining_text(state: &LauncherState, slot: &str) -> String {
    match state.snapshot().remaining(state.scaling_group.as_deref(), slot) {
        None => "unlimited".to_string(),
        Some(v) if slot == "mem" => format_gib((v / GIB * 100.0).floor() / 100.0),
        Some(v) => format!("{}", v),
    }
}

fn render_step_resources(state: &LauncherState, frame: &mut Frame, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(12), Constraint::Length(4)])
        .split(area);

    let fields = resource_fields(state);
    let focus = state.field_focus.min(fields.len() - 1);
    let form = &state.resources;
    let templates = state.templates.list();

    let mut lines = vec![
        Line::from(Span::styled(
            "Per-container resources",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];

    for (idx, field) in fields.iter().enumerate() {
        let selected = idx == focus;
        let line = match field {
            ResField::Template => {
                let value = match templates.get(state.template_cursor) {
                    Some(t) => {
                        let mut text = format!("{} ({})", t.name, t.summary());
                        if t.source == TemplateSource::Server {
                            text.push_str(" [server]");
                        }
                        if !t.allocatable {
                            text.push_str(" - does not fit");
                        }
                        text
                    }
                    None => "(none)".to_string(),
                };
                render_field_line("Template:", &value, selected, false, "[←/→] Browse  [Space] Apply")
            }
            ResField::ScalingGroup => render_field_line(
                "Resource group:",
                state.scaling_group.as_deref().unwrap_or("(default)"),
                selected,
                false,
                "[←/→] Change",
            ),
            ResField::Amount(resource) => {
                let editing = selected && state.editing;
                Slider::new(
                    resource.label(),
                    form.value(*resource),
                    form.bounds(*resource),
                    form.display_value(*resource),
                )
                .selected(selected)
                .editing(editing.then_some(state.edit_buffer.as_str()))
                .line()
            }
            ResField::AcceleratorType => render_field_line(
                "Accelerator:",
                form.request.accelerator_type.as_deref().unwrap_or("(none)"),
                selected,
                false,
                "[←/→] Change",
            ),
            ResField::ClusterMode => render_field_line(
                "Cluster mode:",
                form.request.cluster_mode.as_str(),
                selected,
                false,
                "[Space] Toggle",
            ),
        };
        lines.push(line);
    }

    frame.render_widget(Paragraph::new(lines), chunks[0]);

    let mut remaining = vec![
        format!("cpu {}", remaining_text(state, "cpu")),
        format!("mem {}", remaining_text(state, "mem")),
    ];
    for slot in form.limits.accelerator_types() {
        remaining.push(format!("{} {}", slot, remaining_text(state, &slot)));
    }

    let summary = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("Total:     ", Style::default().fg(Color::Yellow)),
            Span::raw(form.summary()),
        ]),
        Line::from(vec![
            Span::styled("Remaining: ", Style::default().fg(Color::Yellow)),
            Span::raw(remaining.join(", ")),
        ]),
    ])
    .wrap(Wrap { trim: false })
    .block(
        Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    frame.render_widget(summary, chunks[1]);
}

fn render_step_folders(state: &LauncherState, frame: &mut Frame, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(3)])
        .split(area);

    let folders = &state.folders;
    let items: Vec<ListItem> = if folders.available().is_empty() {
        vec![ListItem::new(Span::styled(
            "No folders available in this project",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        folders
            .available()
            .iter()
            .enumerate()
            .map(|(idx, folder)| {
                let checked = folders.is_selected(&folder.name);
                let checkbox = if checked { "[x]" } else { "[ ]" };
                let editing = state.editing && idx == folders.cursor;
                let target = if editing {
                    format!("alias: {}|", state.edit_buffer)
                } else if checked {
                    format!("→ {}", folders.mount_path(&folder.name))
                } else {
                    String::new()
                };
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("{} ", checkbox),
                        Style::default().fg(if checked { Color::Green } else { Color::DarkGray }),
                    ),
                    Span::raw(format!("{:20}", folder.name)),
                    Span::styled(
                        format!("{:4} {:10} ", folder.permission, folder.usage_mode),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(
                        target,
                        if editing {
                            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                        } else {
                            Style::default().fg(Color::Cyan)
                        },
                    ),
                ]))
            })
            .collect()
    };

    let mut list_state = ListState::default();
    if !folders.available().is_empty() {
        list_state.select(Some(folders.cursor));
    }

    let selected_count = folders.selected().count();
    let list = List::new(items)
        .block(
            Block::default()
                .title(format!(
                    " Folders ({} of {} selected) ",
                    selected_count,
                    folders.available().len()
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray)),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ");
    StatefulWidget::render(list, chunks[0], frame.buffer_mut(), &mut list_state);

    let automount = if folders.automount().is_empty() {
        "none".to_string()
    } else {
        folders.automount().join(", ")
    };
    let footer = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("Always mounted: ", Style::default().fg(Color::Yellow)),
            Span::raw(automount),
        ]),
        Line::from(Span::styled(
            "Aliases are relative to /home/work unless they start with /",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .wrap(Wrap { trim: false });
    frame.render_widget(footer, chunks[1]);
}

fn review_line(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{:16}", label), Style::default().fg(Color::Yellow)),
        Span::raw(value),
    ])
}

fn render_step_review(state: &LauncherState, frame: &mut Frame, area: Rect) {
    let form = &state.resources;
    let mut lines = vec![
        Line::from(Span::styled(
            "Summary",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];

    let image = state
        .environments
        .selected_image()
        .map(|i| format!("{} ({})", i.canonical(), i.architecture))
        .unwrap_or_else(|| "(none)".to_string());
    lines.push(review_line("Image:", image));

    let count = form.request.session_count;
    let name = match (state.session_name.trim(), count) {
        ("", _) => "(auto-generated)".to_string(),
        (name, 1) => name.to_string(),
        (name, n) => format!("{}-xxxxx × {}", name, n),
    };
    lines.push(review_line("Session name:", name));
    lines.push(review_line("Type:", state.session_type.as_str().to_string()));
    if state.session_type == SessionType::Batch {
        lines.push(review_line("Command:", state.startup_command.clone()));
        if !state.starts_at.is_empty() {
            lines.push(review_line("Start at:", state.starts_at.clone()));
        }
    }
    if let Some(ref sg) = state.scaling_group {
        lines.push(review_line("Resource group:", sg.clone()));
    }

    lines.push(Line::from(""));
    lines.push(review_line("Resources:", form.summary()));
    lines.push(review_line(
        "Shared memory:",
        format_gib(form.request.shmem_gib.min(form.request.mem_gib)),
    ));
    lines.push(review_line(
        "Cluster:",
        format!(
            "{} × {}",
            form.request.cluster_size,
            form.request.cluster_mode.as_str()
        ),
    ));

    lines.push(Line::from(""));
    let mount_map = state.folders.mount_map();
    let selected: Vec<&String> = state.folders.selected().collect();
    if selected.is_empty() {
        lines.push(review_line("Folders:", "none".to_string()));
    } else {
        for (idx, folder) in selected.iter().enumerate() {
            let path = mount_map
                .get(*folder)
                .cloned()
                .unwrap_or_else(|| state.folders.mount_path(folder));
            let label = if idx == 0 { "Folders:" } else { "" };
            lines.push(review_line(label, format!("{} → {}", folder, path)));
        }
    }

    let vars = state.env_vars.to_map();
    if !vars.is_empty() {
        let names: Vec<&str> = vars.keys().map(String::as_str).collect();
        lines.push(review_line("Variables:", names.join(", ")));
    }
    if !state.ports.ports().is_empty() {
        let ports: Vec<String> = state.ports.ports().iter().map(|p| p.to_string()).collect();
        lines.push(review_line("Pre-open ports:", ports.join(", ")));
    }

    let summary = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(summary, area);
}

/// Handle key input for the launcher
pub fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    let Some(ref state) = app.launcher else {
        return Ok(());
    };
    if state.launching {
        return Ok(());
    }
    if state.editing {
        return handle_edit_key(app, key);
    }
    let step = state.current_step();

    match key.code {
        KeyCode::Enter => {
            if step == LauncherStep::Review {
                app.start_launch();
            } else if let Some(ref mut state) = app.launcher {
                state.move_progress(1);
            }
            return Ok(());
        }
        KeyCode::Esc => {
            if state.wizard.is_first() {
                app.push_screen(Screen::Confirm(ConfirmAction::DiscardLauncher));
            } else if let Some(ref mut state) = app.launcher {
                state.move_progress(-1);
            }
            return Ok(());
        }
        KeyCode::Tab => {
            begin_edit(app);
            return Ok(());
        }
        KeyCode::Char('v') => {
            app.variables = VariablesDialog::default();
            app.push_screen(Screen::Variables);
            return Ok(());
        }
        KeyCode::Char('?') => {
            app.push_screen(Screen::Help);
            return Ok(());
        }
        _ => {}
    }

    let message = match step {
        LauncherStep::Environment => handle_step_environment(app, key),
        LauncherStep::Resources => handle_step_resources(app, key),
        LauncherStep::Folders => handle_step_folders(app, key),
        LauncherStep::Review => None,
    };
    if let Some(msg) = message {
        app.set_status(msg);
    }
    Ok(())
}

fn begin_edit(app: &mut App) {
    let Some(ref mut state) = app.launcher else {
        return;
    };
    let Some(target) = edit_target(state) else {
        return;
    };
    state.edit_buffer = current_text(state, &target);
    state.editing = true;
}

fn handle_edit_key(app: &mut App, key: KeyEvent) -> Result<()> {
    let Some(ref mut state) = app.launcher else {
        return Ok(());
    };
    let Some(target) = edit_target(state) else {
        state.editing = false;
        return Ok(());
    };

    let mut message = None;
    match key.code {
        KeyCode::Esc => {
            if target == EditTarget::Filter {
                state.edit_buffer.clear();
                message = apply_filter(state);
            }
            state.editing = false;
            state.edit_buffer.clear();
        }
        KeyCode::Enter | KeyCode::Tab => {
            state.error_message = None;
            message = commit_edit(state, &target);
            state.editing = false;
            state.edit_buffer.clear();
        }
        KeyCode::Backspace => {
            state.edit_buffer.pop();
            if target == EditTarget::Filter {
                message = apply_filter(state);
            }
        }
        KeyCode::Char(c) => {
            state.edit_buffer.push(c);
            if target == EditTarget::Filter {
                message = apply_filter(state);
            }
        }
        _ => {}
    }

    if let Some(msg) = message {
        app.set_status(msg);
    }
    Ok(())
}

fn handle_step_environment(app: &mut App, key: KeyEvent) -> Option<String> {
    let state = app.launcher.as_mut()?;
    let fields = environment_fields(state);
    let focus = state.field_focus.min(fields.len() - 1);

    match key.code {
        KeyCode::Char('j') | KeyCode::Down => {
            state.field_focus = (focus + 1).min(fields.len() - 1);
            None
        }
        KeyCode::Char('k') | KeyCode::Up => {
            state.field_focus = focus.saturating_sub(1);
            None
        }
        KeyCode::Left | KeyCode::Right => {
            let delta = if key.code == KeyCode::Right { 1 } else { -1 };
            match fields[focus] {
                EnvField::Environment => state.cycle_environment(delta).map(|n| n.to_string()),
                EnvField::Version => state.cycle_version(delta).map(|n| n.to_string()),
                EnvField::Type => {
                    state.session_type = state.session_type.toggle();
                    None
                }
                _ => None,
            }
        }
        KeyCode::Char(' ') if fields[focus] == EnvField::Type => {
            state.session_type = state.session_type.toggle();
            None
        }
        KeyCode::Char('/') => {
            state.field_focus = 0;
            state.edit_buffer = state.environments.filter.clone();
            state.editing = true;
            None
        }
        _ => None,
    }
}

fn handle_step_resources(app: &mut App, key: KeyEvent) -> Option<String> {
    let state = app.launcher.as_mut()?;
    let fields = resource_fields(state);
    let focus = state.field_focus.min(fields.len() - 1);

    match key.code {
        KeyCode::Char('j') | KeyCode::Down => {
            state.field_focus = (focus + 1).min(fields.len() - 1);
            None
        }
        KeyCode::Char('k') | KeyCode::Up => {
            state.field_focus = focus.saturating_sub(1);
            None
        }
        KeyCode::Left | KeyCode::Right => {
            let delta = if key.code == KeyCode::Right { 1 } else { -1 };
            match fields[focus] {
                ResField::Template => {
                    let count = state.templates.len();
                    if count > 0 {
                        state.template_cursor =
                            (state.template_cursor as i32 + delta).rem_euclid(count as i32) as usize;
                    }
                    None
                }
                ResField::ScalingGroup => state.cycle_scaling_group(delta).map(|n| n.to_string()),
                ResField::Amount(field) => state.resources.step(field, delta).map(|n| n.to_string()),
                ResField::AcceleratorType => {
                    state.resources.cycle_accelerator(delta);
                    None
                }
                ResField::ClusterMode => {
                    state.resources.request.cluster_mode = state.resources.request.cluster_mode.toggle();
                    None
                }
            }
        }
        KeyCode::Char(' ') => match fields[focus] {
            ResField::Template => {
                let name = state
                    .templates
                    .list()
                    .get(state.template_cursor)
                    .map(|t| t.name.clone())?;
                Some(match state.apply_template(&name) {
                    Some(notice) => notice.to_string(),
                    None => format!("Applied template {}", name),
                })
            }
            ResField::ClusterMode => {
                state.resources.request.cluster_mode = state.resources.request.cluster_mode.toggle();
                None
            }
            _ => None,
        },
        _ => None,
    }
}

fn handle_step_folders(app: &mut App, key: KeyEvent) -> Option<String> {
    let state = app.launcher.as_mut()?;

    match key.code {
        KeyCode::Char('j') | KeyCode::Down => {
            state.folders.move_cursor(1);
            None
        }
        KeyCode::Char('k') | KeyCode::Up => {
            state.folders.move_cursor(-1);
            None
        }
        KeyCode::Char(' ') => state.folders.toggle_at_cursor().map(|n| n.to_string()),
        KeyCode::Char('a') => {
            let name = state.folders.name_at_cursor()?.to_string();
            state.edit_buffer = state.folders.alias(&name).unwrap_or_default().to_string();
            state.editing = true;
            None
        }
        KeyCode::Char('x') | KeyCode::Delete => {
            let name = state.folders.name_at_cursor()?.to_string();
            state.folders.set_alias(&name, "").err().map(|n| n.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use crate::config::Config;
    use crate::launcher::LauncherData;
    use crate::presets::TemplateStore;
    use crossterm::event::KeyModifiers;
    use std::sync::Arc;

    fn app_with_launcher() -> App {
        let client = FakeClient::default();
        let data = LauncherData::load(&client, "default", None).unwrap();
        let config = Config::default();
        let launcher = LauncherState::new(data, &config, TemplateStore::load_embedded());
        let mut app = App::new(config, Arc::new(client));
        app.launcher = Some(launcher);
        app.push_screen(Screen::Launcher);
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

    fn launcher(app: &App) -> &LauncherState {
        app.launcher.as_ref().unwrap()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(ResourceField::Memory, "2"), Some(2.0));
        assert_eq!(parse_amount(ResourceField::Memory, "512m"), Some(0.5));
        assert_eq!(parse_amount(ResourceField::SharedMemory, " 1g "), Some(1.0));
        assert_eq!(parse_amount(ResourceField::Cpu, "4"), Some(4.0));
        assert_eq!(parse_amount(ResourceField::Cpu, "4g"), None);
    }

    #[test]
    fn test_batch_adds_fields() {
        let mut app = app_with_launcher();
        assert_eq!(environment_fields(launcher(&app)).len(), 4);
        app.launcher.as_mut().unwrap().session_type = SessionType::Batch;
        assert_eq!(environment_fields(launcher(&app)).len(), 6);
    }

    #[test]
    fn test_accelerator_fields_only_when_offered() {
        let app = app_with_launcher();
        let fields = resource_fields(launcher(&app));
        assert!(fields.contains(&ResField::AcceleratorType));
        assert!(fields.contains(&ResField::ScalingGroup));
    }

    #[test]
    fn test_type_session_name_and_advance() {
        let mut app = app_with_launcher();
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "my-notebook");
        press(&mut app, KeyCode::Enter);
        assert_eq!(launcher(&app).session_name, "my-notebook");
        assert!(!launcher(&app).editing);

        press(&mut app, KeyCode::Enter);
        assert_eq!(launcher(&app).current_step(), LauncherStep::Resources);

        press(&mut app, KeyCode::Esc);
        assert_eq!(launcher(&app).current_step(), LauncherStep::Environment);
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.screen, Screen::Confirm(ConfirmAction::DiscardLauncher));
    }

    #[test]
    fn test_filter_selects_first_match() {
        let mut app = app_with_launcher();
        press(&mut app, KeyCode::Char('/'));
        type_text(&mut app, "torch");
        assert_eq!(
            launcher(&app).environments.selected_id(),
            Some("cr.backend.ai/stable/pytorch")
        );
        press(&mut app, KeyCode::Enter);
        assert_eq!(launcher(&app).environments.filter, "torch");
    }

    #[test]
    fn test_memory_typed_below_shmem_clamps() {
        let mut app = app_with_launcher();
        {
            let state = app.launcher.as_mut().unwrap();
            state.resources.set(ResourceField::Memory, 4.0);
            state.resources.set(ResourceField::SharedMemory, 2.0);
            state.move_progress(1);
            let fields = resource_fields(state);
            state.field_focus = fields
                .iter()
                .position(|f| *f == ResField::Amount(ResourceField::Memory))
                .unwrap();
        }
        press(&mut app, KeyCode::Tab);
        for _ in 0..4 {
            press(&mut app, KeyCode::Backspace);
        }
        type_text(&mut app, "1g");
        press(&mut app, KeyCode::Enter);

        let state = launcher(&app);
        assert_eq!(state.resources.request.mem_gib, 1.0);
        assert_eq!(state.resources.request.shmem_gib, 1.0);
        assert!(app.status_message.as_deref().unwrap_or_default().contains("set to 1g"));
    }

    #[test]
    fn test_invalid_amount_reports_error() {
        let mut app = app_with_launcher();
        {
            let state = app.launcher.as_mut().unwrap();
            state.move_progress(1);
            let fields = resource_fields(state);
            state.field_focus = fields
                .iter()
                .position(|f| *f == ResField::Amount(ResourceField::Cpu))
                .unwrap();
        }
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "lots");
        press(&mut app, KeyCode::Enter);
        assert!(launcher(&app).error_message.is_some());
        assert_eq!(launcher(&app).resources.request.cpu, 1);
    }

    #[test]
    fn test_folder_alias_conflict_is_reported() {
        let mut app = app_with_launcher();
        {
            let state = app.launcher.as_mut().unwrap();
            state.move_progress(1);
            state.move_progress(1);
            state.folders.set_alias("models", "shared").unwrap();
        }
        assert_eq!(launcher(&app).folders.name_at_cursor(), Some("data"));
        press(&mut app, KeyCode::Char('a'));
        type_text(&mut app, "shared");
        press(&mut app, KeyCode::Enter);

        assert!(launcher(&app).folders.alias("data").is_none());
        assert!(app.status_message.as_deref().unwrap_or_default().contains("conflicts"));

        press(&mut app, KeyCode::Char(' '));
        assert!(launcher(&app).folders.is_selected("data"));
    }

    #[test]
    fn test_selecting_folder_under_taken_path_is_reported() {
        let mut app = app_with_launcher();
        {
            let state = app.launcher.as_mut().unwrap();
            state.move_progress(1);
            state.move_progress(1);
            state.folders.set_alias("data", "models").unwrap();
            state.folders.move_cursor(1);
        }
        assert_eq!(launcher(&app).folders.name_at_cursor(), Some("models"));
        press(&mut app, KeyCode::Char(' '));

        assert!(!launcher(&app).folders.is_selected("models"));
        assert!(app
            .status_message
            .as_deref()
            .unwrap_or_default()
            .contains("already mounted at /home/work/models"));
    }

    #[test]
    fn test_template_browse_and_apply() {
        let mut app = app_with_launcher();
        app.launcher.as_mut().unwrap().move_progress(1);
        let target = launcher(&app)
            .templates
            .list()
            .iter()
            .position(|t| t.name == "cpu-small")
            .unwrap();
        for _ in 0..target {
            press(&mut app, KeyCode::Right);
        }
        press(&mut app, KeyCode::Char(' '));
        assert_eq!(launcher(&app).resources.request.cpu, 2);
        assert_eq!(app.status_message.as_deref(), Some("Applied template cpu-small"));
    }
}
