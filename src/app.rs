use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::client::{ProjectInfo, SessionClient, SessionSummary};
use crate::config::Config;
use crate::launcher::{
    build_submissions, launch_all, LaunchReport, LauncherData, LauncherState, SubmissionContext,
};
use crate::presets::TemplateStore;

/// Application screens/views
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// Session list of the current project
    Sessions,
    /// Launcher wizard (step tracked in the launcher state)
    Launcher,
    /// Environment variables / pre-open ports editor over the launcher
    Variables,
    /// Confirmation dialog
    Confirm(ConfirmAction),
    /// Help screen
    Help,
    /// Error dialog (scrollable)
    ErrorDialog,
}

/// Actions that need confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    /// Close the launcher and throw away the form
    DiscardLauncher,
}

/// Events exchanged between the app and its screens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The manager answered and the project list is known
    Connected,
    /// The user switched to another project
    ProjectChanged(String),
    /// Sessions were created; the list should be reloaded
    SessionListRefreshed,
    /// Show a screen
    Navigate(Screen),
}

/// Background operation result
pub enum BackgroundResult {
    ProjectsLoaded(Result<Vec<ProjectInfo>, String>),
    SessionsLoaded(Result<Vec<SessionSummary>, String>),
    LauncherDataLoaded(Result<LauncherData, String>),
    LaunchFinished(LaunchReport),
    /// The worker panicked before it could report
    WorkerFailed(String),
}

/// Which list the variables dialog is editing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariablesSection {
    #[default]
    Environment,
    Ports,
}

/// Cursor and edit state of the variables dialog
#[derive(Debug, Clone, Default)]
pub struct VariablesDialog {
    pub section: VariablesSection,
    pub row: usize,
    /// 0 = name, 1 = value (environment section only)
    pub column: usize,
    pub editing: bool,
    pub buffer: String,
}

/// Application state
pub struct App {
    /// Current screen
    pub screen: Screen,
    /// Screen history for back navigation
    pub screen_stack: Vec<Screen>,
    /// Application configuration
    pub config: Config,
    /// Manager API
    pub client: Arc<dyn SessionClient>,
    /// Whether the manager has answered at least once
    pub connected: bool,
    /// Projects the keypair belongs to
    pub projects: Vec<ProjectInfo>,
    /// Sessions of the current project
    pub sessions: Vec<SessionSummary>,
    /// Selected row in the session list
    pub selected_session: usize,
    /// Built-in and user templates; server presets are merged per launcher
    pub templates: TemplateStore,
    /// Launcher state, kept between openings until the project changes
    pub launcher: Option<LauncherState>,
    /// Variables dialog state
    pub variables: VariablesDialog,
    /// Events waiting to be handled
    pub events: VecDeque<AppEvent>,
    /// Status message
    pub status_message: Option<String>,
    /// When status message was set (for auto-clearing)
    pub status_time: Option<Instant>,
    /// Whether the app should quit
    pub should_quit: bool,
    /// Channel for background operation results
    pub background_rx: Receiver<BackgroundResult>,
    /// Sender for background operations (clone this for threads)
    pub background_tx: Sender<BackgroundResult>,
    /// Number of background operations in flight
    pending: usize,
    /// Whether a background operation is in progress
    pub loading: bool,
    /// Error dialog content (for detailed errors)
    pub error_detail: Option<String>,
    /// Error dialog scroll position
    pub error_scroll: u16,
}

impl App {
    pub fn new(config: Config, client: Arc<dyn SessionClient>) -> Self {
        let templates = TemplateStore::load(&config.templates_path);
        let (background_tx, background_rx) = mpsc::channel();

        Self {
            screen: Screen::Sessions,
            screen_stack: Vec::new(),
            config,
            client,
            connected: false,
            projects: Vec::new(),
            sessions: Vec::new(),
            selected_session: 0,
            templates,
            launcher: None,
            variables: VariablesDialog::default(),
            events: VecDeque::new(),
            status_message: None,
            status_time: None,
            should_quit: false,
            background_rx,
            background_tx,
            pending: 0,
            loading: false,
            error_detail: None,
            error_scroll: 0,
        }
    }

    /// Push a new screen onto the stack
    pub fn push_screen(&mut self, screen: Screen) {
        self.screen_stack.push(self.screen.clone());
        self.screen = screen;
    }

    /// Go back to the previous screen
    pub fn pop_screen(&mut self) {
        if let Some(prev) = self.screen_stack.pop() {
            self.screen = prev;
        }
    }

    /// Pop screens until the session list is showing
    pub fn return_to_sessions(&mut self) {
        self.screen_stack.clear();
        self.screen = Screen::Sessions;
    }

    /// Set a status message (auto-clears after 5 seconds)
    pub fn set_status(&mut self, msg: impl Into<String>) {
        self.status_message = Some(msg.into());
        self.status_time = Some(Instant::now());
    }

    /// Show a detailed error in a scrollable dialog
    pub fn show_error(&mut self, error: impl Into<String>) {
        self.error_detail = Some(error.into());
        self.error_scroll = 0;
        self.push_screen(Screen::ErrorDialog);
    }

    /// Clear status message
    pub fn clear_status(&mut self) {
        self.status_message = None;
        self.status_time = None;
    }

    /// Check and clear status if expired (call in event loop)
    pub fn check_status_expiry(&mut self) {
        if let Some(time) = self.status_time {
            if time.elapsed().as_secs() >= 5 {
                self.clear_status();
            }
        }
    }

    pub fn select_prev(&mut self) {
        if self.selected_session > 0 {
            self.selected_session -= 1;
        }
    }

    pub fn select_next(&mut self) {
        if self.selected_session + 1 < self.sessions.len() {
            self.selected_session += 1;
        }
    }

    /// Id of the configured project, once the project list is known
    pub fn current_project_id(&self) -> Option<String> {
        self.projects
            .iter()
            .find(|p| p.name == self.config.project)
            .map(|p| p.id.clone())
    }

    /// Run `job` on a worker thread and deliver its result through the channel
    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce(&dyn SessionClient) -> BackgroundResult + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let tx = self.background_tx.clone();
        self.pending += 1;
        self.loading = true;

        thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job(client.as_ref())))
                .unwrap_or_else(|payload| {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown error".to_string());
                    BackgroundResult::WorkerFailed(reason)
                });
            let _ = tx.send(result);
        });
    }

    /// Queue an event for the next `process_events` pass
    pub fn dispatch(&mut self, event: AppEvent) {
        tracing::debug!(?event, "dispatch");
        self.events.push_back(event);
    }

    /// Load the project list; success dispatches `Connected`
    pub fn connect(&mut self) {
        self.set_status(format!("Connecting to {}...", self.config.connection.endpoint));
        self.spawn(|client| {
            BackgroundResult::ProjectsLoaded(client.list_projects().map_err(|e| e.user_message()))
        });
    }

    pub fn refresh_sessions(&mut self) {
        let project_id = self.current_project_id();
        self.spawn(move |client| {
            BackgroundResult::SessionsLoaded(
                client
                    .list_sessions(project_id.as_deref())
                    .map_err(|e| e.user_message()),
            )
        });
    }

    /// Switch to the next/previous project
    pub fn cycle_project(&mut self, delta: i32) {
        if self.projects.is_empty() {
            return;
        }
        let current = self
            .projects
            .iter()
            .position(|p| p.name == self.config.project)
            .unwrap_or(0);
        let next = (current as i32 + delta).rem_euclid(self.projects.len() as i32) as usize;
        let name = self.projects[next].name.clone();
        if name != self.config.project {
            self.dispatch(AppEvent::ProjectChanged(name));
        }
    }

    /// Show the launcher. A cached launcher is reset to its first step;
    /// otherwise the server data is fetched first.
    pub fn open_launcher(&mut self) {
        if let Some(launcher) = self.launcher.as_mut() {
            launcher.reset();
            self.variables = VariablesDialog::default();
            self.dispatch(AppEvent::Navigate(Screen::Launcher));
            return;
        }

        let project = self.config.project.clone();
        let project_id = self.current_project_id();
        self.set_status("Loading environments and resources...");
        self.spawn(move |client| {
            BackgroundResult::LauncherDataLoaded(
                LauncherData::load(client, &project, project_id.as_deref())
                    .map_err(|e| e.user_message()),
            )
        });
    }

    /// Hide the launcher; the form is reset on the next opening
    pub fn close_launcher(&mut self) {
        self.return_to_sessions();
    }

    fn submission_context(&self) -> SubmissionContext {
        SubmissionContext {
            project: self.config.project.clone(),
            domain: self.config.connection.domain.clone(),
            enqueue_only: self.config.defaults.enqueue_only,
            max_wait_seconds: self.config.defaults.max_wait_seconds,
        }
    }

    /// Submit the launcher form. Input is ignored until the result arrives.
    pub fn start_launch(&mut self) {
        let ctx = self.submission_context();
        let Some(launcher) = self.launcher.as_mut() else {
            return;
        };
        if launcher.launching {
            return;
        }
        if let Err(e) = launcher.validate_step(crate::launcher::LauncherStep::Review) {
            launcher.error_message = Some(e);
            return;
        }

        let submissions = match build_submissions(launcher, &ctx) {
            Ok(subs) => subs,
            Err(e) => {
                launcher.error_message = Some(e);
                return;
            }
        };
        launcher.launching = true;
        launcher.error_message = None;

        tracing::info!(
            count = submissions.len(),
            image = %submissions.first().map(|s| s.image.as_str()).unwrap_or_default(),
            "launching sessions"
        );
        self.set_status(format!("Launching {} session(s)...", submissions.len()));
        self.spawn(move |client| BackgroundResult::LaunchFinished(launch_all(client, &submissions)));
    }

    /// Check for background operation results (call in event loop)
    pub fn check_background_results(&mut self) {
        // Non-blocking check for results
        while let Ok(result) = self.background_rx.try_recv() {
            self.pending = self.pending.saturating_sub(1);
            self.loading = self.pending > 0;

            match result {
                BackgroundResult::ProjectsLoaded(Ok(projects)) => {
                    self.projects = projects;
                    self.dispatch(AppEvent::Connected);
                }
                BackgroundResult::ProjectsLoaded(Err(e)) => {
                    tracing::warn!(error = %e, "could not load projects");
                    self.show_error(format!(
                        "Could not connect to {}\n\n{}",
                        self.config.connection.endpoint, e
                    ));
                }
                BackgroundResult::SessionsLoaded(Ok(sessions)) => {
                    self.sessions = sessions;
                    if self.selected_session >= self.sessions.len() {
                        self.selected_session = self.sessions.len().saturating_sub(1);
                    }
                }
                BackgroundResult::SessionsLoaded(Err(e)) => {
                    self.set_status(format!("Error loading sessions: {}", e));
                }
                BackgroundResult::LauncherDataLoaded(Ok(data)) => {
                    self.clear_status();
                    self.launcher = Some(LauncherState::new(
                        data,
                        &self.config,
                        self.templates.clone(),
                    ));
                    self.variables = VariablesDialog::default();
                    self.dispatch(AppEvent::Navigate(Screen::Launcher));
                }
                BackgroundResult::LauncherDataLoaded(Err(e)) => {
                    self.show_error(format!("Could not prepare the launcher\n\n{}", e));
                }
                BackgroundResult::LaunchFinished(report) => self.finish_launch(report),
                BackgroundResult::WorkerFailed(reason) => {
                    tracing::error!(%reason, "background worker panicked");
                    if let Some(launcher) = self.launcher.as_mut() {
                        launcher.launching = false;
                    }
                    self.show_error(format!("Background operation failed\n\n{}", reason));
                }
            }
        }
    }

    fn finish_launch(&mut self, report: LaunchReport) {
        let summary = report.summary();
        if let Some(launcher) = self.launcher.as_mut() {
            launcher.launching = false;
            if !report.any_succeeded() {
                launcher.error_message = Some(summary.clone());
            }
        }

        if report.any_succeeded() {
            self.close_launcher();
            self.dispatch(AppEvent::SessionListRefreshed);
        }
        self.set_status(summary);
    }

    /// Handle queued events (call in event loop)
    pub fn process_events(&mut self) {
        while let Some(event) = self.events.pop_front() {
            match event {
                AppEvent::Connected => {
                    let first_time = !self.connected;
                    self.connected = true;
                    if first_time {
                        tracing::info!(
                            endpoint = %self.config.connection.endpoint,
                            projects = self.projects.len(),
                            "connected"
                        );
                        self.set_status(format!("Connected to {}", self.config.connection.endpoint));
                    }
                    self.refresh_sessions();
                }
                AppEvent::ProjectChanged(project) => {
                    tracing::info!(%project, "project changed");
                    self.config.project = project;
                    // resources and folders are per project
                    self.launcher = None;
                    self.selected_session = 0;
                    self.set_status(format!("Project: {}", self.config.project));
                    self.refresh_sessions();
                }
                AppEvent::SessionListRefreshed => self.refresh_sessions(),
                AppEvent::Navigate(screen) => {
                    if self.screen != screen {
                        self.push_screen(screen);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use crate::launcher::ResourceField;
    use std::time::Duration;

    fn app_with(client: FakeClient) -> (App, Arc<FakeClient>) {
        let client = Arc::new(client);
        let mut config = Config::default();
        config.templates_path = std::path::PathBuf::from("/nonexistent/templates.toml");
        let app = App::new(config, client.clone());
        (app, client)
    }

    /// Pump results and events until everything in flight has finished
    fn settle(app: &mut App) {
        for _ in 0..400 {
            app.check_background_results();
            app.process_events();
            if app.pending == 0 && app.events.is_empty() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("background work did not finish");
    }

    fn session(name: &str) -> SessionSummary {
        SessionSummary {
            id: format!("id-{}", name),
            name: name.to_string(),
            status: "RUNNING".to_string(),
            image: "cr.backend.ai/stable/python:3.11".to_string(),
            session_type: "interactive".to_string(),
            created_at: None,
        }
    }

    #[test]
    fn test_connect_loads_projects_then_sessions() {
        let (mut app, _) = app_with(FakeClient {
            sessions: vec![session("one"), session("two")],
            ..FakeClient::default()
        });
        app.connect();
        settle(&mut app);

        assert!(app.connected);
        assert_eq!(app.projects.len(), 1);
        assert_eq!(app.sessions.len(), 2);
        assert!(!app.loading);
        app.select_next();
        app.select_next();
        assert_eq!(app.selected_session, 1);
    }

    #[test]
    fn test_open_launcher_navigates_and_reopen_resets() {
        let (mut app, _) = app_with(FakeClient::default());
        app.open_launcher();
        settle(&mut app);
        assert_eq!(app.screen, Screen::Launcher);

        let launcher = app.launcher.as_mut().unwrap();
        assert!(launcher.move_progress(1));
        assert_eq!(launcher.wizard.current(), 2);

        app.close_launcher();
        assert_eq!(app.screen, Screen::Sessions);
        app.open_launcher();
        settle(&mut app);
        assert_eq!(app.screen, Screen::Launcher);
        assert_eq!(app.launcher.as_ref().unwrap().wizard.current(), 1);
    }

    #[test]
    fn test_successful_launch_closes_and_refreshes() {
        let (mut app, client) = app_with(FakeClient::default());
        app.open_launcher();
        settle(&mut app);

        let launcher = app.launcher.as_mut().unwrap();
        launcher.session_name = "notebook".to_string();
        launcher.resources.set(ResourceField::SessionCount, 2.0);
        app.start_launch();
        assert!(app.loading);
        settle(&mut app);

        assert_eq!(app.screen, Screen::Sessions);
        assert_eq!(client.submitted_names().len(), 2);
        assert!(app
            .status_message
            .as_deref()
            .unwrap_or_default()
            .contains("2 session(s) created"));
        assert!(!app.launcher.as_ref().unwrap().launching);
    }

    #[test]
    fn test_failed_launch_keeps_launcher_open() {
        let (mut app, _) = app_with(FakeClient {
            failing_names: vec!["broken".to_string()],
            ..FakeClient::default()
        });
        app.open_launcher();
        settle(&mut app);

        app.launcher.as_mut().unwrap().session_name = "broken".to_string();
        app.start_launch();
        settle(&mut app);

        assert_eq!(app.screen, Screen::Launcher);
        let launcher = app.launcher.as_ref().unwrap();
        assert!(!launcher.launching);
        assert!(launcher.error_message.as_deref().unwrap_or_default().contains("broken failed"));
    }

    #[test]
    fn test_invalid_form_is_not_submitted() {
        let (mut app, client) = app_with(FakeClient::default());
        app.open_launcher();
        settle(&mut app);

        app.launcher.as_mut().unwrap().session_name = "no".to_string();
        app.start_launch();
        assert!(!app.loading);
        assert!(client.submitted_names().is_empty());
        assert!(app.launcher.as_ref().unwrap().error_message.is_some());
    }

    #[test]
    fn test_panicking_worker_does_not_leave_app_loading() {
        let (mut app, _) = app_with(FakeClient::default());
        app.spawn(|_| panic!("connection reset"));
        assert!(app.loading);
        settle(&mut app);

        assert!(!app.loading);
        assert_eq!(app.screen, Screen::ErrorDialog);
        assert!(app.error_detail.as_deref().unwrap_or_default().contains("connection reset"));
    }

    #[test]
    fn test_project_change_drops_launcher() {
        let (mut app, _) = app_with(FakeClient {
            projects: vec![
                ProjectInfo { id: "p1".to_string(), name: "default".to_string() },
                ProjectInfo { id: "p2".to_string(), name: "research".to_string() },
            ],
            ..FakeClient::default()
        });
        app.connect();
        settle(&mut app);
        app.open_launcher();
        settle(&mut app);
        assert!(app.launcher.is_some());
        app.close_launcher();

        app.cycle_project(1);
        settle(&mut app);
        assert_eq!(app.config.project, "research");
        assert_eq!(app.current_project_id().as_deref(), Some("p2"));
        assert!(app.launcher.is_none());
    }
}
