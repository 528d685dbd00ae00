//! Session launcher state
//!
//! Everything the launcher dialog edits lives in [`LauncherState`]. The UI
//! renders it and feeds key presses into it; the submission module turns it
//! into creation requests.

pub mod environment;
pub mod folders;
pub mod resources;
pub mod submission;
pub mod variables;
pub mod wizard;

use std::fmt;

use crate::client::{ClientError, ImageInfo, ResourceSnapshot, SessionClient, VFolderInfo};
use crate::config::{Config, LaunchDefaults, LimitsConfig};
use crate::presets::TemplateStore;

pub use environment::EnvironmentSelector;
pub use folders::FolderMountSelector;
pub use resources::{
    format_gib, parse_amount, parse_binary_size, ResourceField, ResourceForm, ResourceLimits,
};
pub use submission::{
    build_submissions, launch_all, validate_session_name, LaunchReport, SessionSubmission,
    SubmissionContext,
};
pub use variables::{EnvironmentVariableList, PreOpenPortList};
pub use wizard::{LauncherStep, WizardState};

/// Something the user should be told about, shown in the status bar
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Shared memory was lowered to fit in memory
    SharedMemoryClamped { mem_gib: f64 },
    /// The alias collides with the mount path of another folder
    AliasConflict {
        folder: String,
        alias: String,
        other: String,
    },
    AliasInvalid {
        folder: String,
        alias: String,
        reason: String,
    },
    /// Selecting the folder would mount it where another folder already is
    MountConflict {
        folder: String,
        path: String,
        other: String,
    },
    /// A typed amount was outside its bounds and stored clamped
    ValueAdjusted {
        field: ResourceField,
        requested: f64,
        stored: String,
    },
    TemplateNotAllocatable(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SharedMemoryClamped { mem_gib } => write!(
                f,
                "Shared memory cannot exceed memory; set to {}",
                format_gib(*mem_gib)
            ),
            Notice::AliasConflict { folder, alias, other } => write!(
                f,
                "Alias {:?} for {} conflicts with folder {}; alias cleared",
                alias, folder, other
            ),
            Notice::AliasInvalid { folder, alias, reason } => {
                write!(f, "Alias {:?} for {} rejected: {}", alias, folder, reason)
            }
            Notice::MountConflict { folder, path, other } => write!(
                f,
                "{} not selected: {} is already mounted at {}",
                folder, other, path
            ),
            Notice::ValueAdjusted {
                field,
                requested,
                stored,
            } => write!(
                f,
                "{} {} is out of range; set to {}",
                field.label(),
                requested,
                stored
            ),
            Notice::TemplateNotAllocatable(name) => {
                write!(f, "Template {} does not fit the remaining resources", name)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionType {
    #[default]
    Interactive,
    /// Runs a startup command and terminates when it exits
    Batch,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Interactive => "interactive",
            SessionType::Batch => "batch",
        }
    }

    pub fn toggle(&self) -> Self {
        match self {
            SessionType::Interactive => SessionType::Batch,
            SessionType::Batch => SessionType::Interactive,
        }
    }
}

/// Server data the launcher is built from
#[derive(Debug, Clone, Default)]
pub struct LauncherData {
    pub images: Vec<ImageInfo>,
    pub folders: Vec<VFolderInfo>,
    pub snapshot: ResourceSnapshot,
}

impl LauncherData {
    /// Fetch images, folders and the resource snapshot for a project
    pub fn load(
        client: &dyn SessionClient,
        project: &str,
        project_id: Option<&str>,
    ) -> Result<Self, ClientError> {
        let images = client.list_images()?;
        let folders = client.list_vfolders(project_id)?;
        let snapshot = client.check_presets(project, None)?;
        tracing::info!(
            images = images.len(),
            folders = folders.len(),
            presets = snapshot.presets.len(),
            "launcher data loaded"
        );
        Ok(Self {
            images,
            folders,
            snapshot,
        })
    }
}

/// State of the launcher dialog
#[derive(Debug, Clone)]
pub struct LauncherState {
    pub wizard: WizardState,
    pub session_name: String,
    pub session_type: SessionType,
    /// Batch sessions only
    pub startup_command: String,
    /// Batch sessions only; RFC 3339, empty to start immediately
    pub starts_at: String,
    pub environments: EnvironmentSelector,
    pub resources: ResourceForm,
    pub folders: FolderMountSelector,
    pub env_vars: EnvironmentVariableList,
    pub ports: PreOpenPortList,
    pub scaling_group: Option<String>,
    pub scaling_groups: Vec<String>,
    pub templates: TemplateStore,
    /// Index into `templates.list()`
    pub template_cursor: usize,
    snapshot: ResourceSnapshot,
    limits: LimitsConfig,
    defaults: LaunchDefaults,
    /// Currently focused field within the step
    pub field_focus: usize,
    /// Whether the focused text field is being edited
    pub editing: bool,
    pub edit_buffer: String,
    /// Validation error of the current step
    pub error_message: Option<String>,
    /// A launch is in flight; input is ignored
    pub launching: bool,
}

impl LauncherState {
    pub fn new(data: LauncherData, config: &Config, mut templates: TemplateStore) -> Self {
        templates.merge_server(&data.snapshot.presets);

        let scaling_groups: Vec<String> = data.snapshot.scaling_groups.keys().cloned().collect();
        let scaling_group = match &config.scaling_group {
            Some(sg) if scaling_groups.is_empty() || scaling_groups.contains(sg) => Some(sg.clone()),
            _ => scaling_groups.first().cloned(),
        };

        let mut environments = EnvironmentSelector::from_images(&data.images);
        environments.cycle_environment(0);

        let limits = ResourceLimits::derive(
            &data.snapshot,
            environments.selected_image(),
            &config.limits,
            scaling_group.as_deref(),
        );

        Self {
            wizard: WizardState::new(LauncherStep::ALL.len()),
            session_name: String::new(),
            session_type: SessionType::Interactive,
            startup_command: String::new(),
            starts_at: String::new(),
            environments,
            resources: ResourceForm::new(limits, &config.defaults),
            folders: FolderMountSelector::from_folders(&data.folders),
            env_vars: EnvironmentVariableList::default(),
            ports: PreOpenPortList::new(config.limits.max_preopen_ports),
            scaling_group,
            scaling_groups,
            templates,
            template_cursor: 0,
            snapshot: data.snapshot,
            limits: config.limits.clone(),
            defaults: config.defaults.clone(),
            field_focus: 0,
            editing: false,
            edit_buffer: String::new(),
            error_message: None,
            launching: false,
        }
    }

    pub fn current_step(&self) -> LauncherStep {
        LauncherStep::from_number(self.wizard.current()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> &ResourceSnapshot {
        &self.snapshot
    }

    /// Check whether a step's inputs allow moving past it
    pub fn validate_step(&self, step: LauncherStep) -> Result<(), String> {
        match step {
            LauncherStep::Environment => {
                let Some(env) = self.environments.selected_environment() else {
                    return Err("Please select an environment".to_string());
                };
                if self.environments.selected_image().is_none() {
                    return Err(format!("No version of {} is available", env.short_name));
                }
                let name = self.session_name.trim();
                if !name.is_empty() {
                    validate_session_name(name, self.resources.request.session_count)?;
                }
                if self.session_type == SessionType::Batch {
                    if self.startup_command.trim().is_empty() {
                        return Err("Batch sessions need a startup command".to_string());
                    }
                    let starts_at = self.starts_at.trim();
                    if !starts_at.is_empty()
                        && chrono::DateTime::parse_from_rfc3339(starts_at).is_err()
                    {
                        return Err(format!(
                            "Invalid start time {:?} (expected e.g. 2024-05-01T09:00:00+09:00)",
                            starts_at
                        ));
                    }
                }
                Ok(())
            }
            LauncherStep::Resources => {
                self.resources.check_satisfiable()?;
                let name = self.session_name.trim();
                if !name.is_empty() && self.resources.request.session_count > 1 {
                    validate_session_name(name, self.resources.request.session_count)?;
                }
                Ok(())
            }
            LauncherStep::Folders => Ok(()),
            LauncherStep::Review => {
                for earlier in [
                    LauncherStep::Environment,
                    LauncherStep::Resources,
                    LauncherStep::Folders,
                ] {
                    self.validate_step(earlier)?;
                }
                self.env_vars.validate()
            }
        }
    }

    /// Move through the steps. Forward moves require the current step to be
    /// valid; a refusal leaves the reason in `error_message`.
    pub fn move_progress(&mut self, delta: isize) -> bool {
        let valid = if delta > 0 {
            match self.validate_step(self.current_step()) {
                Ok(()) => true,
                Err(e) => {
                    self.error_message = Some(e);
                    false
                }
            }
        } else {
            true
        };

        let moved = self.wizard.move_progress(delta, valid);
        if moved {
            self.error_message = None;
            self.field_focus = 0;
            self.editing = false;
        }
        moved
    }

    /// Recompute resource bounds after the image or scaling group changed
    pub fn refresh_limits(&mut self) -> Option<Notice> {
        let limits = ResourceLimits::derive(
            &self.snapshot,
            self.environments.selected_image(),
            &self.limits,
            self.scaling_group.as_deref(),
        );
        self.resources.set_limits(limits)
    }

    pub fn select_environment(&mut self, id: &str) -> Option<Notice> {
        self.environments.select_environment(id);
        self.refresh_limits()
    }

    pub fn cycle_environment(&mut self, delta: i32) -> Option<Notice> {
        self.environments.cycle_environment(delta);
        self.refresh_limits()
    }

    pub fn cycle_version(&mut self, delta: i32) -> Option<Notice> {
        self.environments.cycle_version(delta);
        self.refresh_limits()
    }

    pub fn cycle_scaling_group(&mut self, delta: i32) -> Option<Notice> {
        if self.scaling_groups.is_empty() {
            return None;
        }
        let current = self
            .scaling_group
            .as_ref()
            .and_then(|sg| self.scaling_groups.iter().position(|s| s == sg))
            .unwrap_or(0);
        let next = (current as i32 + delta).rem_euclid(self.scaling_groups.len() as i32) as usize;
        self.scaling_group = Some(self.scaling_groups[next].clone());
        self.refresh_limits()
    }

    /// Fill the resource form from a template
    pub fn apply_template(&mut self, name: &str) -> Option<Notice> {
        let template = self.templates.get(name)?.clone();
        if !template.allocatable {
            return Some(Notice::TemplateNotAllocatable(template.name));
        }
        self.resources.apply_template(&template)
    }

    /// Back to a fresh form on the first step, keeping the loaded server data
    pub fn reset(&mut self) {
        self.wizard.reset();
        self.session_name.clear();
        self.session_type = SessionType::Interactive;
        self.startup_command.clear();
        self.starts_at.clear();
        self.folders.reset();
        self.env_vars.clear();
        self.ports.clear();
        self.resources.request = resources::ResourceRequest::from_defaults(&self.defaults);
        self.resources.request.accelerator_type =
            self.resources.limits.accelerators.keys().next().cloned();
        self.resources.clamp_all();
        self.template_cursor = 0;
        self.field_focus = 0;
        self.editing = false;
        self.edit_buffer.clear();
        self.error_message = None;
        self.launching = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;

    fn state_with(client: &FakeClient) -> LauncherState {
        LauncherState::new(
            LauncherData::load(client, "default", None).unwrap(),
            &Config::default(),
            TemplateStore::load_embedded(),
        )
    }

    #[test]
    fn test_new_selects_first_environment_and_scaling_group() {
        let state = state_with(&FakeClient::default());
        assert_eq!(state.current_step(), LauncherStep::Environment);
        assert_eq!(
            state.environments.selected_id(),
            Some("cr.backend.ai/stable/python")
        );
        assert_eq!(state.scaling_group.as_deref(), Some("default"));
        assert!(state.validate_step(LauncherStep::Environment).is_ok());
    }

    #[test]
    fn test_invalid_name_blocks_forward_only() {
        let mut state = state_with(&FakeClient::default());
        state.session_name = "x!".to_string();
        assert!(!state.move_progress(1));
        assert_eq!(state.wizard.current(), 1);
        assert!(state.error_message.is_some());

        state.session_name = "good-name".to_string();
        assert!(state.move_progress(1));
        assert_eq!(state.current_step(), LauncherStep::Resources);
        assert!(state.error_message.is_none());

        state.session_name = "x!".to_string();
        assert!(state.move_progress(-1));
        assert_eq!(state.wizard.current(), 1);
    }

    #[test]
    fn test_unknown_environment_blocks_progress() {
        let mut state = state_with(&FakeClient::default());
        state.select_environment("cr.backend.ai/stable/gone");
        assert!(!state.environments.version_enabled());
        assert!(!state.move_progress(1));
    }

    #[test]
    fn test_batch_requires_command_and_valid_start() {
        let mut state = state_with(&FakeClient::default());
        state.session_type = SessionType::Batch;
        assert!(state.validate_step(LauncherStep::Environment).is_err());
        state.startup_command = "./run.sh".to_string();
        state.starts_at = "tomorrow".to_string();
        assert!(state.validate_step(LauncherStep::Environment).is_err());
        state.starts_at = "2030-01-01T09:00:00+00:00".to_string();
        assert!(state.validate_step(LauncherStep::Environment).is_ok());
    }

    #[test]
    fn test_review_checks_variables() {
        let mut state = state_with(&FakeClient::default());
        state.env_vars.push("9LIVES", "x");
        assert!(state.validate_step(LauncherStep::Review).is_err());
    }

    #[test]
    fn test_templates_and_scaling_group_cycle() {
        let mut client = FakeClient::default();
        client.snapshot.presets = vec![serde_json::from_value(serde_json::json!({
            "name": "too-big",
            "resource_slots": {"cpu": "64", "mem": "274877906944"},
            "allocatable": false
        }))
        .unwrap()];
        let mut state = state_with(&client);

        assert!(matches!(
            state.apply_template("too-big"),
            Some(Notice::TemplateNotAllocatable(_))
        ));
        assert_eq!(state.resources.request.cpu, 1);

        state.apply_template("cpu-medium");
        assert_eq!(state.resources.request.cpu, 4);
        assert_eq!(state.resources.request.mem_gib, 16.0);
        assert!(state.apply_template("missing").is_none());

        // only one scaling group: cycling keeps it
        state.cycle_scaling_group(1);
        assert_eq!(state.scaling_group.as_deref(), Some("default"));
    }

    #[test]
    fn test_reset_returns_to_first_step() {
        let mut state = state_with(&FakeClient::default());
        state.session_name = "abcd".to_string();
        state.folders.set_alias("data", "input").unwrap();
        state.move_progress(1);
        state.move_progress(1);
        assert_eq!(state.wizard.current(), 3);

        state.reset();
        assert_eq!(state.wizard.current(), 1);
        assert!(state.session_name.is_empty());
        assert!(state.folders.mount_map().is_empty());
        assert_eq!(state.resources.request.cpu, 1);
    }

    #[test]
    fn test_notice_messages() {
        let notice = Notice::SharedMemoryClamped { mem_gib: 2.0 };
        assert_eq!(notice.to_string(), "Shared memory cannot exceed memory; set to 2g");
    }
}
