pub mod screens;
pub mod widgets;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use std::io::Stdout;
use std::time::Duration;

use crate::app::{App, ConfirmAction, Screen};

/// Run the TUI application
pub fn run(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    app.connect();

    loop {
        terminal.draw(|frame| render(app, frame))?;

        // Check for status message expiry
        app.check_status_expiry();

        // Check for background operation results
        app.check_background_results();

        app.process_events();

        // Poll with timeout to allow periodic checks
        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) => {
                    // Ignore input while loading, except for quitting
                    if !app.loading || is_ctrl_c(&key) {
                        handle_key(app, key)?;
                    }
                }
                Event::Mouse(mouse) => {
                    if !app.loading {
                        handle_mouse(app, mouse)?;
                    }
                }
                _ => {}
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn is_ctrl_c(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

/// Handle mouse input
fn handle_mouse(app: &mut App, mouse: MouseEvent) -> Result<()> {
    let delta = match mouse.kind {
        MouseEventKind::ScrollUp => -1,
        MouseEventKind::ScrollDown => 1,
        _ => return Ok(()),
    };

    match app.screen {
        Screen::Sessions => {
            if delta > 0 {
                app.select_next();
            } else {
                app.select_prev();
            }
        }
        Screen::Launcher => {
            if let Some(ref mut state) = app.launcher {
                if state.current_step() == crate::launcher::LauncherStep::Folders {
                    state.folders.move_cursor(delta);
                }
            }
        }
        Screen::ErrorDialog => {
            app.error_scroll = if delta > 0 {
                app.error_scroll.saturating_add(1)
            } else {
                app.error_scroll.saturating_sub(1)
            };
        }
        _ => {}
    }
    Ok(())
}

fn execute_confirm_action(app: &mut App, action: ConfirmAction) -> Result<()> {
    match action {
        ConfirmAction::DiscardLauncher => {
            if let Some(ref mut state) = app.launcher {
                state.reset();
            }
            app.close_launcher();
        }
    }
    Ok(())
}

/// Whether the launcher sits under the current screen
fn launcher_visible(app: &App) -> bool {
    app.launcher.is_some()
        && (app.screen == Screen::Launcher || app.screen_stack.contains(&Screen::Launcher))
}

/// Render the current screen
fn render(app: &App, frame: &mut Frame) {
    screens::sessions::render(app, frame);

    match &app.screen {
        Screen::Sessions => {}
        Screen::Launcher => screens::launcher::render(app, frame),
        Screen::Variables => {
            screens::launcher::render(app, frame);
            screens::variables::render(app, frame);
        }
        Screen::Confirm(action) => {
            if launcher_visible(app) {
                screens::launcher::render(app, frame);
            }
            render_confirm(action, frame);
        }
        Screen::Help => {
            if launcher_visible(app) {
                screens::launcher::render(app, frame);
            }
            screens::help::render(frame);
        }
        Screen::ErrorDialog => {
            if launcher_visible(app) {
                screens::launcher::render(app, frame);
            }
            render_error_dialog(app, frame);
        }
    }
}

/// Handle key input
fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    // Global quit with Ctrl+C
    if is_ctrl_c(&key) {
        app.should_quit = true;
        return Ok(());
    }

    // Global quit with q/Q (except where q might be typed)
    if (key.code == KeyCode::Char('q') || key.code == KeyCode::Char('Q'))
        && !matches!(app.screen, Screen::Launcher | Screen::Variables)
    {
        app.should_quit = true;
        return Ok(());
    }

    match &app.screen {
        Screen::Sessions => screens::sessions::handle_key(app, key)?,
        Screen::Launcher => screens::launcher::handle_key(app, key)?,
        Screen::Variables => screens::variables::handle_key(app, key)?,
        Screen::Confirm(action) => handle_confirm(app, action.clone(), key)?,
        Screen::Help => handle_help(app, key)?,
        Screen::ErrorDialog => handle_error_dialog(app, key)?,
    }

    Ok(())
}

fn handle_confirm(app: &mut App, action: ConfirmAction, key: KeyEvent) -> Result<()> {
    match key.code {
        KeyCode::Esc | KeyCode::Char('n') => app.pop_screen(),
        KeyCode::Char('y') | KeyCode::Enter => {
            execute_confirm_action(app, action)?;
        }
        _ => {}
    }
    Ok(())
}

fn handle_help(app: &mut App, _key: KeyEvent) -> Result<()> {
    // Any key closes help
    app.pop_screen();
    Ok(())
}

fn render_confirm(action: &ConfirmAction, frame: &mut Frame) {
    use crate::ui::widgets::ConfirmDialog;

    let (title, message) = match action {
        ConfirmAction::DiscardLauncher => (
            "Close Launcher",
            "Close the launcher? The values entered so far will be discarded.",
        ),
    };

    ConfirmDialog::new(title, message)
        .labels("Close (y)", "Keep editing (n)")
        .render(frame.area(), frame.buffer_mut());
}

fn render_error_dialog(app: &App, frame: &mut Frame) {
    use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

    let area = frame.area();
    let dialog_width = 80.min(area.width.saturating_sub(4));
    let dialog_height = 20.min(area.height.saturating_sub(4));

    let dialog_area = centered_rect(dialog_width, dialog_height, area);
    frame.render_widget(Clear, dialog_area);

    let block = Block::default()
        .title(" ⚠ Error ")
        .title_bottom(" [↑/↓ or j/k] Scroll  [Enter/Esc] Close ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
        .style(Style::default().bg(Color::Black));

    let inner = block.inner(dialog_area);
    frame.render_widget(block, dialog_area);

    let error_text = app.error_detail.as_deref().unwrap_or("No error details");

    let formatted_error = format!(
        "{}\n\n─────────────────────────────────────────\nCheck the endpoint and keypair in {} or the BACKEND_* variables.",
        error_text,
        crate::config::Config::config_file_path().display()
    );

    let paragraph = Paragraph::new(formatted_error)
        .style(Style::default().fg(Color::White))
        .wrap(Wrap { trim: false })
        .scroll((app.error_scroll, 0));
    frame.render_widget(paragraph, inner);
}

fn handle_error_dialog(app: &mut App, key: KeyEvent) -> Result<()> {
    match key.code {
        KeyCode::Esc | KeyCode::Enter => {
            app.error_detail = None;
            app.error_scroll = 0;
            app.pop_screen();
        }
        KeyCode::Char('j') | KeyCode::Down => {
            app.error_scroll = app.error_scroll.saturating_add(1);
        }
        KeyCode::Char('k') | KeyCode::Up => {
            app.error_scroll = app.error_scroll.saturating_sub(1);
        }
        _ => {}
    }
    Ok(())
}

pub fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}
