//! Blocking HTTP implementation of [`SessionClient`]

use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::auth::{signed_headers, Credentials, SigningInput};
use super::{
    ClientError, CreatedSession, ImageInfo, ProjectInfo, ResourceSnapshot, SessionClient,
    SessionSummary, VFolderInfo,
};
use crate::config::ConnectionConfig;
use crate::launcher::SessionSubmission;

const CONTENT_TYPE: &str = "application/json";

/// Session statuses shown in the session list
const LISTED_STATUSES: &str = "PENDING,SCHEDULED,PREPARING,PULLING,PREPARED,CREATING,RUNNING,RESTARTING";

const IMAGES_QUERY: &str = "query($installed: Boolean) { \
    images(is_installed: $installed) { \
        name tag registry architecture installed \
        resource_limits { key min max } \
        labels { key value } \
    } }";

const PROJECTS_QUERY: &str = "query { user { groups { id name } } }";

const SESSIONS_QUERY: &str = "query($group_id: UUID, $limit: Int!, $offset: Int!, $status: String) { \
    compute_session_list(group_id: $group_id, limit: $limit, offset: $offset, status: $status) { \
        items { id name status image type created_at } \
        total_count \
    } }";

/// Client for the manager REST/GraphQL API using keypair signing
pub struct HttpClient {
    http: Client,
    endpoint: Url,
    credentials: Credentials,
    api_version: String,
    domain: String,
}

impl HttpClient {
    pub fn new(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ClientError::Settings(format!("invalid endpoint {:?}: {}", config.endpoint, e))
        })?;
        if endpoint.host_str().is_none() {
            return Err(ClientError::Settings(format!(
                "endpoint {:?} has no host",
                config.endpoint
            )));
        }
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            return Err(ClientError::Settings("access key and secret key are required".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(concat!("session-launcher/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            credentials: Credentials {
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
            },
            api_version: config.api_version.clone(),
            domain: config.domain.clone(),
        })
    }

    /// Host header value the signature is computed over
    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    fn url_for(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        let base = self.endpoint.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base, path));
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    /// Send a signed request and return the decoded JSON body
    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let url = self.url_for(path, query);
        let rel_path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        let host = self.host();
        let input = SigningInput {
            method: method.as_str(),
            path: &rel_path,
            date: Utc::now(),
            host: &host,
            content_type: CONTENT_TYPE,
            api_version: &self.api_version,
        };

        tracing::debug!(method = %method, path = %rel_path, "sending signed request");

        let mut builder = self.http.request(method.clone(), url);
        for (name, value) in signed_headers(&input, &self.credentials) {
            builder = builder.header(name, value);
        }
        builder = builder.header("X-BackendAI-Domain", &self.domain);
        if let Some(body) = body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send()?;
        let status = response.status();
        let text = response.text()?;

        if !status.is_success() {
            let err = api_error(status.as_u16(), status.canonical_reason(), &text);
            tracing::warn!(method = %method, path = %rel_path, status = status.as_u16(), error = %err, "request failed");
            return Err(err);
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Run a query against the legacy GraphQL endpoint and return its `data`
    fn graphql(&self, query: &str, variables: Value) -> Result<Value, ClientError> {
        let body = json!({ "query": query, "variables": variables });
        let mut value = self.request(Method::POST, "/admin/gql", &[], Some(&body))?;

        if let Some(errors) = value.get("errors").and_then(Value::as_array) {
            if let Some(first) = errors.first() {
                let message = first
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(ClientError::GraphQl(message));
            }
        }
        match value.get_mut("data") {
            Some(data) => Ok(data.take()),
            None => Ok(value),
        }
    }
}

/// Build an API error from a problem-json body ({"type", "title", "msg"})
fn api_error(status: u16, reason: Option<&str>, body: &str) -> ClientError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |key: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let title = field("title")
        .or_else(|| reason.map(str::to_string))
        .unwrap_or_else(|| "Request failed".to_string());
    let message = field("msg").or_else(|| field("message")).unwrap_or_default();

    ClientError::Api { status, title, message }
}

fn take_field<T: DeserializeOwned>(mut value: Value, path: &[&str]) -> Result<T, ClientError> {
    for key in path {
        value = value
            .get_mut(*key)
            .map(Value::take)
            .ok_or_else(|| ClientError::GraphQl(format!("missing field {:?} in response", key)))?;
    }
    Ok(serde_json::from_value(value)?)
}

impl SessionClient for HttpClient {
    fn list_images(&self) -> Result<Vec<ImageInfo>, ClientError> {
        let data = self.graphql(IMAGES_QUERY, json!({ "installed": true }))?;
        take_field(data, &["images"])
    }

    fn list_vfolders(&self, project_id: Option<&str>) -> Result<Vec<VFolderInfo>, ClientError> {
        let query: Vec<(&str, &str)> = project_id.map(|id| ("group_id", id)).into_iter().collect();
        let value = self.request(Method::GET, "/folders", &query, None)?;
        Ok(serde_json::from_value(value)?)
    }

    fn check_presets(
        &self,
        project: &str,
        scaling_group: Option<&str>,
    ) -> Result<ResourceSnapshot, ClientError> {
        let body = json!({ "group": project, "scaling_group": scaling_group });
        let value = self.request(Method::POST, "/resource/check-presets", &[], Some(&body))?;
        Ok(serde_json::from_value(value)?)
    }

    fn list_projects(&self) -> Result<Vec<ProjectInfo>, ClientError> {
        let data = self.graphql(PROJECTS_QUERY, json!({}))?;
        take_field(data, &["user", "groups"])
    }

    fn list_sessions(&self, project_id: Option<&str>) -> Result<Vec<SessionSummary>, ClientError> {
        let variables = json!({
            "group_id": project_id,
            "limit": 100,
            "offset": 0,
            "status": LISTED_STATUSES,
        });
        let data = self.graphql(SESSIONS_QUERY, variables)?;
        take_field(data, &["compute_session_list", "items"])
    }

    fn create_session(&self, submission: &SessionSubmission) -> Result<CreatedSession, ClientError> {
        let body = serde_json::to_value(submission)?;
        let value = self.request(Method::POST, "/session", &[], Some(&body))?;
        let mut created: CreatedSession = serde_json::from_value(value)?;
        if created.session_name.is_empty() {
            created.session_name = submission.name.clone();
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::submission::{SessionSubmission, SubmissionConfig};
    use httpmock::prelude::*;
    use std::collections::BTreeMap;

    fn client_for(server: &MockServer) -> HttpClient {
        HttpClient::new(&ConnectionConfig {
            endpoint: server.base_url(),
            access_key: "AKIATEST".to_string(),
            secret_key: "secret".to_string(),
            ..ConnectionConfig::default()
        })
        .unwrap()
    }

    fn submission(name: &str) -> SessionSubmission {
        SessionSubmission {
            name: name.to_string(),
            image: "cr.backend.ai/stable/python:3.11".to_string(),
            architecture: "x86_64".to_string(),
            session_type: "interactive".to_string(),
            group: "default".to_string(),
            domain: "default".to_string(),
            cluster_size: 1,
            cluster_mode: "single-node".to_string(),
            enqueue_only: true,
            max_wait_seconds: 0,
            reuse_if_exists: false,
            startup_command: None,
            starts_at: None,
            config: SubmissionConfig {
                mounts: vec![],
                mount_map: BTreeMap::new(),
                environ: BTreeMap::new(),
                resources: BTreeMap::from([("cpu".to_string(), "1".to_string())]),
                resource_opts: BTreeMap::new(),
                scaling_group: None,
                preopen_ports: vec![],
            },
        }
    }

    #[test]
    fn test_rejects_bad_settings() {
        let missing_keys = HttpClient::new(&ConnectionConfig::default());
        assert!(matches!(missing_keys, Err(ClientError::Settings(_))));

        let bad_endpoint = HttpClient::new(&ConnectionConfig {
            endpoint: "not a url".to_string(),
            access_key: "a".to_string(),
            secret_key: "b".to_string(),
            ..ConnectionConfig::default()
        });
        assert!(matches!(bad_endpoint, Err(ClientError::Settings(_))));
    }

    #[test]
    fn test_create_session_sends_signed_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/session")
                .header_exists("Authorization")
                .header_exists("Date")
                .header("X-BackendAI-Version", "v8.20240915")
                .header("X-BackendAI-Domain", "default")
                .header("Content-Type", "application/json")
                .json_body_partial(r#"{"name": "my-session", "clusterSize": 1}"#);
            then.status(201).json_body(json!({
                "sessionId": "7a9b7c1e-0000-4000-8000-000000000001",
                "sessionName": "my-session",
                "status": "PENDING",
                "servicePorts": [],
                "created": true
            }));
        });

        let created = client_for(&server).create_session(&submission("my-session")).unwrap();
        mock.assert();
        assert_eq!(created.session_name, "my-session");
        assert_eq!(created.status, "PENDING");
        assert!(created.created);
    }

    #[test]
    fn test_error_body_is_mapped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/session");
            then.status(400).json_body(json!({
                "type": "https://api.backend.ai/probs/invalid-api-params",
                "title": "Invalid API parameters",
                "msg": "Session name is already taken"
            }));
        });

        let err = client_for(&server).create_session(&submission("dup")).unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.user_message(), "Invalid API parameters: Session name is already taken");
    }

    #[test]
    fn test_request_timeout_status_means_preparing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/session");
            then.status(408).body("");
        });

        let err = client_for(&server).create_session(&submission("slow")).unwrap_err();
        assert!(err.is_still_preparing());
    }

    #[test]
    fn test_list_vfolders_passes_project() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/folders").query_param("group_id", "p-1");
            then.status(200).json_body(json!([
                {"id": "f1", "name": "data", "host": "local:volume1", "status": "ready",
                 "usage_mode": "general", "permission": "rw", "ownership_type": "user"},
                {"id": "f2", "name": ".linuxbrew", "status": "ready"}
            ]));
        });

        let folders = client_for(&server).list_vfolders(Some("p-1")).unwrap();
        mock.assert();
        assert_eq!(folders.len(), 2);
        assert!(folders[1].is_automount());
    }

    #[test]
    fn test_graphql_errors_are_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/admin/gql");
            then.status(200).json_body(json!({
                "errors": [{"message": "Cannot query field \"images\""}]
            }));
        });

        let err = client_for(&server).list_images().unwrap_err();
        assert!(matches!(err, ClientError::GraphQl(ref m) if m.contains("images")));
    }

    #[test]
    fn test_list_projects_reads_nested_groups() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/admin/gql");
            then.status(200).json_body(json!({
                "user": {"groups": [{"id": "p-1", "name": "default"}, {"id": "p-2", "name": "research"}]}
            }));
        });

        let projects = client_for(&server).list_projects().unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[1].name, "research");
    }
}
