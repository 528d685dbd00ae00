//! In-memory [`SessionClient`] for tests

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{
    ClientError, CreatedSession, ImageInfo, ImageLabel, ImageResourceLimit, ProjectInfo,
    ResourceSnapshot, ScalingGroupResources, SessionClient, SessionSummary, VFolderInfo,
};
use crate::launcher::SessionSubmission;

pub struct FakeClient {
    pub images: Vec<ImageInfo>,
    pub folders: Vec<VFolderInfo>,
    pub snapshot: ResourceSnapshot,
    pub projects: Vec<ProjectInfo>,
    pub sessions: Vec<SessionSummary>,
    /// Session names whose creation fails with HTTP 400
    pub failing_names: Vec<String>,
    /// Session names whose creation times out with HTTP 408
    pub slow_names: Vec<String>,
    pub submitted: Mutex<Vec<SessionSubmission>>,
}

pub fn image(name: &str, tag: &str) -> ImageInfo {
    ImageInfo {
        name: name.to_string(),
        tag: tag.to_string(),
        registry: "cr.backend.ai/stable".to_string(),
        architecture: "x86_64".to_string(),
        installed: true,
        resource_limits: vec![
            ImageResourceLimit {
                key: "cpu".to_string(),
                min: Some("1".to_string()),
                max: None,
            },
            ImageResourceLimit {
                key: "mem".to_string(),
                min: Some("1g".to_string()),
                max: None,
            },
        ],
        labels: vec![ImageLabel {
            key: "ai.backend.role".to_string(),
            value: "COMPUTE".to_string(),
        }],
    }
}

pub fn folder(name: &str) -> VFolderInfo {
    VFolderInfo {
        id: format!("id-{}", name),
        name: name.to_string(),
        host: "local:volume1".to_string(),
        status: "ready".to_string(),
        usage_mode: "general".to_string(),
        permission: "rw".to_string(),
        ownership_type: "user".to_string(),
    }
}

fn slots(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

impl Default for FakeClient {
    fn default() -> Self {
        let mut system = image("backendai-socks", "1.0");
        system.labels[0].value = "SYSTEM".to_string();

        Self {
            images: vec![
                image("python", "3.10-ubuntu20.04"),
                image("python", "3.11-ubuntu22.04"),
                image("pytorch", "2.1-py311-cuda12.1"),
                system,
            ],
            folders: vec![folder("data"), folder("models"), folder(".local")],
            snapshot: ResourceSnapshot {
                presets: vec![],
                keypair_limits: slots(&[("cpu", f64::INFINITY), ("mem", f64::INFINITY)]),
                keypair_remaining: slots(&[
                    ("cpu", 16.0),
                    ("mem", 64.0 * GIB),
                    ("cuda.shares", 4.0),
                ]),
                scaling_group_remaining: slots(&[("cpu", 32.0), ("mem", 128.0 * GIB)]),
                scaling_groups: BTreeMap::from([(
                    "default".to_string(),
                    ScalingGroupResources {
                        using: BTreeMap::new(),
                        remaining: slots(&[
                            ("cpu", 32.0),
                            ("mem", 128.0 * GIB),
                            ("cuda.shares", 8.0),
                        ]),
                    },
                )]),
            },
            projects: vec![ProjectInfo {
                id: "p-default".to_string(),
                name: "default".to_string(),
            }],
            sessions: vec![],
            failing_names: vec![],
            slow_names: vec![],
            submitted: Mutex::new(Vec::new()),
        }
    }
}

impl FakeClient {
    pub fn submitted_names(&self) -> Vec<String> {
        self.submitted
            .lock()
            .map(|s| s.iter().map(|sub| sub.name.clone()).collect())
            .unwrap_or_default()
    }
}

impl SessionClient for FakeClient {
    fn list_images(&self) -> Result<Vec<ImageInfo>, ClientError> {
        Ok(self.images.clone())
    }

    fn list_vfolders(&self, _project_id: Option<&str>) -> Result<Vec<VFolderInfo>, ClientError> {
        Ok(self.folders.clone())
    }

    fn check_presets(
        &self,
        _project: &str,
        _scaling_group: Option<&str>,
    ) -> Result<ResourceSnapshot, ClientError> {
        Ok(self.snapshot.clone())
    }

    fn list_projects(&self) -> Result<Vec<ProjectInfo>, ClientError> {
        Ok(self.projects.clone())
    }

    fn list_sessions(&self, _project_id: Option<&str>) -> Result<Vec<SessionSummary>, ClientError> {
        Ok(self.sessions.clone())
    }

    fn create_session(&self, submission: &SessionSubmission) -> Result<CreatedSession, ClientError> {
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(submission.clone());
        }
        let base = submission.name.as_str();
        if self.failing_names.iter().any(|n| base.starts_with(n.as_str())) {
            return Err(ClientError::Api {
                status: 400,
                title: "Invalid API parameters".to_string(),
                message: format!("cannot create {}", submission.name),
            });
        }
        if self.slow_names.iter().any(|n| base.starts_with(n.as_str())) {
            return Err(ClientError::Api {
                status: 408,
                title: "Request Timeout".to_string(),
                message: String::new(),
            });
        }
        Ok(CreatedSession {
            session_id: Some(format!("sid-{}", submission.name)),
            session_name: submission.name.clone(),
            status: "PENDING".to_string(),
            created: true,
        })
    }
}
