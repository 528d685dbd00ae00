//! Manager API client
//!
//! The launcher only talks to the cluster through the [`SessionClient`] trait.
//! [`HttpClient`] is the real implementation; tests use `fake::FakeClient`.

pub mod auth;
pub mod http;

#[cfg(test)]
pub mod fake;

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::launcher::SessionSubmission;

pub use http::HttpClient;

/// Resource slot name → amount (cpu cores, memory bytes, accelerator units)
pub type ResourceSlots = BTreeMap<String, f64>;

/// Errors returned by the manager API client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{title}: {message} (HTTP {status})")]
    Api {
        status: u16,
        title: String,
        message: String,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("GraphQL query failed: {0}")]
    GraphQl(String),
    #[error("invalid client settings: {0}")]
    Settings(String),
}

impl ClientError {
    /// HTTP status of the failed request, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The request timed out while the session was still being prepared.
    /// The session usually appears shortly after, so this is not a failure.
    pub fn is_still_preparing(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => *status == 408,
            ClientError::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Short message suitable for a status-bar notification
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api { message, title, .. } if !message.is_empty() => {
                if title.is_empty() {
                    message.clone()
                } else {
                    format!("{}: {}", title, message)
                }
            }
            ClientError::Api { title, status, .. } => format!("{} (HTTP {})", title, status),
            other => other.to_string(),
        }
    }
}

/// Minimum/maximum resource requirement declared by an image
#[derive(Debug, Clone, Deserialize)]
pub struct ImageResourceLimit {
    pub key: String,
    #[serde(default)]
    pub min: Option<String>,
    #[serde(default)]
    pub max: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageLabel {
    pub key: String,
    pub value: String,
}

/// A container image available to the user
#[derive(Debug, Clone, Deserialize)]
pub struct ImageInfo {
    pub name: String,
    pub tag: String,
    pub registry: String,
    #[serde(default = "default_architecture")]
    pub architecture: String,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub resource_limits: Vec<ImageResourceLimit>,
    #[serde(default)]
    pub labels: Vec<ImageLabel>,
}

fn default_architecture() -> String {
    "x86_64".to_string()
}

impl ImageInfo {
    /// Environment identifier shared by all tags of an image
    pub fn environment_id(&self) -> String {
        format!("{}/{}", self.registry, self.name)
    }

    /// Full image reference sent in the creation request
    pub fn canonical(&self) -> String {
        format!("{}/{}:{}", self.registry, self.name, self.tag)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.key == key)
            .map(|l| l.value.as_str())
    }

    /// Minimum amount of a slot required by the image, in slot units
    pub fn min_requirement(&self, slot: &str) -> Option<f64> {
        let raw = self
            .resource_limits
            .iter()
            .find(|l| l.key == slot)?
            .min
            .as_deref()?;
        if slot == "mem" {
            crate::launcher::parse_binary_size(raw).map(|b| b as f64)
        } else {
            raw.trim().parse::<f64>().ok()
        }
    }
}

/// A virtual folder that can be mounted into a session
#[derive(Debug, Clone, Deserialize)]
pub struct VFolderInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_folder_status")]
    pub status: String,
    #[serde(default)]
    pub usage_mode: String,
    #[serde(default)]
    pub permission: String,
    #[serde(default)]
    pub ownership_type: String,
}

fn default_folder_status() -> String {
    "ready".to_string()
}

impl VFolderInfo {
    /// Dot-prefixed folders are mounted by the server into every session
    pub fn is_automount(&self) -> bool {
        self.name.starts_with('.')
    }

    pub fn is_mountable(&self) -> bool {
        self.status == "ready"
    }
}

/// A resource preset as reported by the server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerPreset {
    pub name: String,
    #[serde(deserialize_with = "deserialize_slots")]
    pub resource_slots: ResourceSlots,
    #[serde(default, deserialize_with = "deserialize_opt_amount")]
    pub shared_memory: Option<f64>,
    #[serde(default = "default_true")]
    pub allocatable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScalingGroupResources {
    #[serde(default, deserialize_with = "deserialize_slots")]
    pub using: ResourceSlots,
    #[serde(default, deserialize_with = "deserialize_slots")]
    pub remaining: ResourceSlots,
}

/// Aggregated resource availability for the current keypair and project
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default)]
    pub presets: Vec<ServerPreset>,
    #[serde(default, deserialize_with = "deserialize_slots")]
    pub keypair_limits: ResourceSlots,
    #[serde(default, deserialize_with = "deserialize_slots")]
    pub keypair_remaining: ResourceSlots,
    #[serde(default, deserialize_with = "deserialize_slots")]
    pub scaling_group_remaining: ResourceSlots,
    #[serde(default)]
    pub scaling_groups: BTreeMap<String, ScalingGroupResources>,
}

impl ResourceSnapshot {
    /// Remaining amount of a slot, the tighter of keypair and scaling group.
    /// `None` means unlimited.
    pub fn remaining(&self, scaling_group: Option<&str>, slot: &str) -> Option<f64> {
        let group_remaining = scaling_group
            .and_then(|sg| self.scaling_groups.get(sg))
            .map(|sg| &sg.remaining)
            .unwrap_or(&self.scaling_group_remaining);

        [
            self.keypair_remaining.get(slot),
            group_remaining.get(slot),
        ]
        .into_iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .reduce(f64::min)
    }

    /// Accelerator slot names known to the server
    pub fn accelerator_slots(&self) -> Vec<String> {
        let mut slots: Vec<String> = self
            .keypair_limits
            .keys()
            .chain(self.keypair_remaining.keys())
            .chain(self.scaling_group_remaining.keys())
            .filter(|k| is_accelerator_slot(k))
            .cloned()
            .collect();
        slots.sort();
        slots.dedup();
        slots
    }
}

pub fn is_accelerator_slot(slot: &str) -> bool {
    slot.ends_with(".device") || slot.ends_with(".shares")
}

/// A project (user group) the keypair belongs to
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
}

/// One row of the session list
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummary {
    #[serde(alias = "session_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, alias = "type")]
    pub session_type: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Manager response to a creation request
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSession {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(rename = "sessionName", default)]
    pub session_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default = "default_true")]
    pub created: bool,
}

/// Operations the launcher needs from the cluster
pub trait SessionClient: Send + Sync {
    fn list_images(&self) -> Result<Vec<ImageInfo>, ClientError>;
    fn list_vfolders(&self, project_id: Option<&str>) -> Result<Vec<VFolderInfo>, ClientError>;
    fn check_presets(
        &self,
        project: &str,
        scaling_group: Option<&str>,
    ) -> Result<ResourceSnapshot, ClientError>;
    fn list_projects(&self) -> Result<Vec<ProjectInfo>, ClientError>;
    fn list_sessions(&self, project_id: Option<&str>) -> Result<Vec<SessionSummary>, ClientError>;
    fn create_session(&self, submission: &SessionSubmission) -> Result<CreatedSession, ClientError>;
}

/// Slot amounts arrive as decimal strings ("2", "4294967296", "Infinity") or numbers
fn parse_amount(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let v = s.trim().parse::<f64>().ok()?;
            // NaN is reported for hidden group resources; treat as unlimited
            Some(if v.is_nan() { f64::INFINITY } else { v })
        }
        _ => None,
    }
}

fn deserialize_slots<'de, D>(deserializer: D) -> Result<ResourceSlots, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| parse_amount(&v).map(|amount| (k, amount)))
        .collect())
}

fn deserialize_opt_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_parses_decimal_strings() {
        let snapshot: ResourceSnapshot = serde_json::from_value(json!({
            "presets": [{
                "name": "small",
                "resource_slots": {"cpu": "1", "mem": "1073741824"},
                "shared_memory": null,
                "allocatable": false
            }],
            "keypair_limits": {"cpu": "Infinity", "mem": "Infinity", "cuda.shares": "8"},
            "keypair_remaining": {"cpu": "8", "mem": "17179869184", "cuda.shares": "4.5"},
            "scaling_group_remaining": {"cpu": "32", "mem": "68719476736"},
            "scaling_groups": {
                "gpu": {"using": {"cpu": "2"}, "remaining": {"cpu": "4", "cuda.shares": "2"}}
            }
        }))
        .unwrap();

        assert_eq!(snapshot.presets.len(), 1);
        assert!(!snapshot.presets[0].allocatable);
        assert_eq!(snapshot.presets[0].resource_slots["mem"], 1073741824.0);
        assert!(snapshot.keypair_limits["cpu"].is_infinite());
        assert_eq!(snapshot.remaining(None, "cpu"), Some(8.0));
        assert_eq!(snapshot.remaining(Some("gpu"), "cpu"), Some(4.0));
        assert_eq!(snapshot.remaining(Some("gpu"), "cuda.shares"), Some(2.0));
        assert_eq!(snapshot.accelerator_slots(), vec!["cuda.shares".to_string()]);
    }

    #[test]
    fn test_unlimited_remaining_is_none() {
        let snapshot: ResourceSnapshot = serde_json::from_value(json!({
            "keypair_remaining": {"cpu": "Infinity"},
            "scaling_group_remaining": {"cpu": "NaN"}
        }))
        .unwrap();
        assert_eq!(snapshot.remaining(None, "cpu"), None);
        assert_eq!(snapshot.remaining(None, "mem"), None);
    }

    #[test]
    fn test_image_helpers() {
        let image: ImageInfo = serde_json::from_value(json!({
            "name": "python-ff",
            "tag": "3.11-ubuntu22.04",
            "registry": "cr.backend.ai/stable",
            "resource_limits": [
                {"key": "cpu", "min": "1", "max": null},
                {"key": "mem", "min": "1g", "max": null}
            ],
            "labels": [{"key": "ai.backend.role", "value": "COMPUTE"}]
        }))
        .unwrap();

        assert_eq!(image.environment_id(), "cr.backend.ai/stable/python-ff");
        assert_eq!(image.canonical(), "cr.backend.ai/stable/python-ff:3.11-ubuntu22.04");
        assert_eq!(image.architecture, "x86_64");
        assert_eq!(image.min_requirement("cpu"), Some(1.0));
        assert_eq!(image.min_requirement("mem"), Some(1073741824.0));
        assert_eq!(image.min_requirement("cuda.device"), None);
        assert_eq!(image.label("ai.backend.role"), Some("COMPUTE"));
    }

    #[test]
    fn test_error_messages() {
        let err = ClientError::Api {
            status: 412,
            title: "Quota exceeded".to_string(),
            message: "Your keypair has reached the concurrent session limit.".to_string(),
        };
        assert_eq!(
            err.user_message(),
            "Quota exceeded: Your keypair has reached the concurrent session limit."
        );
        assert!(!err.is_still_preparing());

        let timeout = ClientError::Api {
            status: 408,
            title: "Request Timeout".to_string(),
            message: String::new(),
        };
        assert!(timeout.is_still_preparing());
        assert_eq!(timeout.status(), Some(408));
        assert_eq!(timeout.user_message(), "Request Timeout (HTTP 408)");
    }
}
