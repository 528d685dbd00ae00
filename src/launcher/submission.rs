//! Turning the launcher state into creation requests and sending them

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use super::resources::{format_gib, SHMEM_STEP_GIB};
use super::{LauncherState, SessionType};
use crate::client::SessionClient;

static RE_SESSION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w[\w.-]*\w$").expect("Invalid regex: RE_SESSION_NAME"));

pub const MIN_NAME_LEN: usize = 4;
pub const MAX_NAME_LEN: usize = 64;
const BULK_SUFFIX_LEN: usize = 5;

/// Body of `POST /session`. Built right before the call and dropped after.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSubmission {
    pub name: String,
    pub image: String,
    pub architecture: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub group: String,
    pub domain: String,
    #[serde(rename = "clusterSize")]
    pub cluster_size: u32,
    #[serde(rename = "clusterMode")]
    pub cluster_mode: String,
    #[serde(rename = "enqueueOnly")]
    pub enqueue_only: bool,
    #[serde(rename = "maxWaitSeconds")]
    pub max_wait_seconds: u32,
    #[serde(rename = "reuseIfExists")]
    pub reuse_if_exists: bool,
    #[serde(rename = "startupCommand", skip_serializing_if = "Option::is_none")]
    pub startup_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
    pub config: SubmissionConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmissionConfig {
    pub mounts: Vec<String>,
    pub mount_map: BTreeMap<String, String>,
    pub environ: BTreeMap<String, String>,
    pub resources: BTreeMap<String, String>,
    pub resource_opts: BTreeMap<String, String>,
    #[serde(rename = "scalingGroup", skip_serializing_if = "Option::is_none")]
    pub scaling_group: Option<String>,
    pub preopen_ports: Vec<u16>,
}

/// Values that come from configuration rather than the form
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub project: String,
    pub domain: String,
    pub enqueue_only: bool,
    pub max_wait_seconds: u32,
}

/// Check a user-entered session name. `count` sessions share it as a prefix.
pub fn validate_session_name(name: &str, count: u32) -> Result<(), String> {
    let max = if count > 1 {
        MAX_NAME_LEN - BULK_SUFFIX_LEN - 1
    } else {
        MAX_NAME_LEN
    };
    let len = name.chars().count();
    if len < MIN_NAME_LEN || len > max {
        return Err(format!(
            "Session name must be {} to {} characters long",
            MIN_NAME_LEN, max
        ));
    }
    if !RE_SESSION_NAME.is_match(name) {
        return Err(
            "Session name may only contain letters, digits, _ . - and must start and end with a letter or digit"
                .to_string(),
        );
    }
    Ok(())
}

fn random_suffix(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string()[..len].to_string()
}

/// Name derived from the environment when the user left it empty
pub fn generated_name(short_name: &str) -> String {
    let cleaned: String = short_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let base: String = cleaned.chars().take(32).collect();
    let base = if base.is_empty() { "session".to_string() } else { base };
    format!("{}-{}", base, random_suffix(8))
}

/// Names for every session of a (possibly bulk) launch
pub fn session_names(base: &str, count: u32) -> Vec<String> {
    if count <= 1 {
        return vec![base.to_string()];
    }
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(count as usize);
    while names.len() < count as usize {
        let name = format!("{}-{}", base, random_suffix(BULK_SUFFIX_LEN));
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

/// Assemble one submission per requested session
pub fn build_submissions(
    state: &LauncherState,
    ctx: &SubmissionContext,
) -> Result<Vec<SessionSubmission>, String> {
    let image = state
        .environments
        .selected_image()
        .ok_or_else(|| "No environment version selected".to_string())?;
    let request = &state.resources.request;

    let base = if state.session_name.trim().is_empty() {
        let short = state
            .environments
            .selected_environment()
            .map(|e| e.short_name.as_str())
            .unwrap_or("session");
        generated_name(short)
    } else {
        state.session_name.trim().to_string()
    };

    let mut resources = BTreeMap::new();
    resources.insert("cpu".to_string(), request.cpu.to_string());
    resources.insert("mem".to_string(), format_gib(request.mem_gib));
    if request.accelerator_count > 0.0 {
        if let Some(slot) = &request.accelerator_type {
            resources.insert(slot.clone(), format!("{}", request.accelerator_count));
        }
    }

    // shared memory never exceeds memory, even if the form was bypassed
    let shmem = request.shmem_gib.min(request.mem_gib).max(SHMEM_STEP_GIB.min(request.mem_gib));
    let resource_opts = BTreeMap::from([("shmem".to_string(), format_gib(shmem))]);

    let (startup_command, starts_at) = match state.session_type {
        SessionType::Batch => (
            Some(state.startup_command.trim().to_string()).filter(|s| !s.is_empty()),
            Some(state.starts_at.trim().to_string()).filter(|s| !s.is_empty()),
        ),
        SessionType::Interactive => (None, None),
    };

    let config = SubmissionConfig {
        mounts: state.folders.mounts(),
        mount_map: state.folders.mount_map(),
        environ: state.env_vars.to_map(),
        resources,
        resource_opts,
        scaling_group: state.scaling_group.clone(),
        preopen_ports: state.ports.ports().to_vec(),
    };

    Ok(session_names(&base, request.session_count)
        .into_iter()
        .map(|name| SessionSubmission {
            name,
            image: image.canonical(),
            architecture: image.architecture.clone(),
            session_type: state.session_type.as_str().to_string(),
            group: ctx.project.clone(),
            domain: ctx.domain.clone(),
            cluster_size: request.cluster_size,
            cluster_mode: request.cluster_mode.as_str().to_string(),
            enqueue_only: ctx.enqueue_only,
            max_wait_seconds: ctx.max_wait_seconds,
            reuse_if_exists: false,
            startup_command: startup_command.clone(),
            starts_at: starts_at.clone(),
            config: config.clone(),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq)]
pub enum LaunchResult {
    Created {
        session_id: Option<String>,
        status: String,
    },
    /// The request timed out while the session was being prepared
    Preparing,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub name: String,
    pub result: LaunchResult,
}

/// Per-session results of a launch
#[derive(Debug, Clone, Default)]
pub struct LaunchReport {
    pub outcomes: Vec<LaunchOutcome>,
}

impl LaunchReport {
    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, LaunchResult::Created { .. }))
            .count()
    }

    pub fn preparing(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result == LaunchResult::Preparing)
            .count()
    }

    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                LaunchResult::Failed(msg) => Some((o.name.as_str(), msg.as_str())),
                _ => None,
            })
            .collect()
    }

    /// At least one session was created or is on its way
    pub fn any_succeeded(&self) -> bool {
        self.created() + self.preparing() > 0
    }

    /// Status-bar message for the whole launch
    pub fn summary(&self) -> String {
        let failures = self.failures();
        let mut parts = Vec::new();
        match (self.created(), self.outcomes.len()) {
            (1, 1) => parts.push(format!("Session {} created", self.outcomes[0].name)),
            (0, _) => {}
            (n, _) => parts.push(format!("{} session(s) created", n)),
        }
        if self.preparing() > 0 {
            parts.push(format!(
                "{} session(s) still preparing, check the session list shortly",
                self.preparing()
            ));
        }
        match failures.as_slice() {
            [] => {}
            [(name, msg)] => parts.push(format!("{} failed: {}", name, msg)),
            many => parts.push(format!("{} session(s) failed: {}", many.len(), many[0].1)),
        }
        parts.join("; ")
    }
}

/// Send every submission in order. Failed requests are reported and do not
/// stop or undo the others.
pub fn launch_all(client: &dyn SessionClient, submissions: &[SessionSubmission]) -> LaunchReport {
    let mut report = LaunchReport::default();
    for submission in submissions {
        let result = match client.create_session(submission) {
            Ok(created) => {
                tracing::info!(name = %created.session_name, status = %created.status, "session created");
                LaunchResult::Created {
                    session_id: created.session_id,
                    status: created.status,
                }
            }
            Err(e) if e.is_still_preparing() => {
                tracing::info!(name = %submission.name, "creation timed out, session is still preparing");
                LaunchResult::Preparing
            }
            Err(e) => {
                tracing::warn!(name = %submission.name, error = %e, "session creation failed");
                LaunchResult::Failed(e.user_message())
            }
        };
        report.outcomes.push(LaunchOutcome {
            name: submission.name.clone(),
            result,
        });
    }
    report
}
