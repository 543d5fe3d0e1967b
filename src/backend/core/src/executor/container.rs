//! Container orchestrator capability for side-car deployments.
//!
//! Specified abstractly so implementations can target the Docker Engine HTTP
//! API, an in-memory stub, or another runtime.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ErrorCode, MedicError, Result};

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    /// `(host_port, container_port)` TCP bindings.
    pub ports: Vec<(u16, u16)>,
    pub cmd: Vec<String>,
}

/// A container runtime.
#[async_trait]
pub trait ContainerOrchestrator: Send + Sync {
    async fn image_pull(&self, image: &str) -> Result<()>;
    async fn container_exists(&self, name: &str) -> Result<bool>;
    async fn container_running(&self, name: &str) -> Result<bool>;
    /// Create a container; returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start(&self, name: &str) -> Result<()>;
    async fn stop(&self, name: &str) -> Result<()>;
    async fn remove(&self, name: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Docker Engine
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
}

#[derive(Debug, Deserialize)]
struct InspectResponse {
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(rename = "Id")]
    id: String,
}

/// Orchestrator over the Docker Engine HTTP API.
pub struct DockerEngine {
    base_url: String,
    http: reqwest::Client,
}

impl DockerEngine {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(MedicError::from)?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn engine_error(response: reqwest::Response, context: &str) -> MedicError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        MedicError::with_internal(
            ErrorCode::ContainerOperationFailed,
            format!("{} failed with status {}", context, status),
            body,
        )
    }
}

#[async_trait]
impl ContainerOrchestrator for DockerEngine {
    async fn image_pull(&self, image: &str) -> Result<()> {
        let (name, tag) = image.rsplit_once(':').unwrap_or((image, "latest"));
        let response = self
            .http
            .post(self.url("/images/create"))
            .query(&[("fromImage", name), ("tag", tag)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MedicError::with_internal(
                ErrorCode::ImagePullFailed,
                format!("Image pull failed for {}", image),
                format!("status {}", response.status()),
            ));
        }
        // The engine streams pull progress; drain it.
        let _ = response.bytes().await;
        info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.url(&format!("/containers/{}/json", name)))
            .send()
            .await?;
        match response.status().as_u16() {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            _ => Err(Self::engine_error(response, "Container inspect").await),
        }
    }

    async fn container_running(&self, name: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.url(&format!("/containers/{}/json", name)))
            .send()
            .await?;
        match response.status().as_u16() {
            404 => Ok(false),
            s if (200..300).contains(&s) => {
                let inspect: InspectResponse = response.json().await?;
                Ok(inspect.state.running)
            }
            _ => Err(Self::engine_error(response, "Container inspect").await),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut exposed = serde_json::Map::new();
        let mut bindings = serde_json::Map::new();
        for (host, container) in &spec.ports {
            let key = format!("{}/tcp", container);
            exposed.insert(key.clone(), json!({}));
            bindings.insert(key, json!([{ "HostPort": host.to_string() }]));
        }

        let mut body = json!({
            "Image": spec.image,
            "Env": env,
            "ExposedPorts": exposed,
            "HostConfig": { "PortBindings": bindings, "RestartPolicy": { "Name": "unless-stopped" } },
        });
        if !spec.cmd.is_empty() {
            body["Cmd"] = json!(spec.cmd);
        }

        let response = self
            .http
            .post(self.url("/containers/create"))
            .query(&[("name", spec.name.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::engine_error(response, "Container create").await);
        }
        let created: CreateResponse = response.json().await?;
        debug!(name = %spec.name, id = %created.id, "Container created");
        Ok(created.id)
    }

    async fn start(&self, name: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/containers/{}/start", name)))
            .send()
            .await?;
        // 304: already started.
        match response.status().as_u16() {
            s if (200..300).contains(&s) => Ok(()),
            304 => Ok(()),
            _ => Err(Self::engine_error(response, "Container start").await),
        }
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/containers/{}/stop", name)))
            .send()
            .await?;
        match response.status().as_u16() {
            s if (200..300).contains(&s) => Ok(()),
            304 | 404 => Ok(()),
            _ => Err(Self::engine_error(response, "Container stop").await),
        }
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/containers/{}", name)))
            .query(&[("force", "true")])
            .send()
            .await?;
        match response.status().as_u16() {
            s if (200..300).contains(&s) => Ok(()),
            404 => Ok(()),
            _ => Err(Self::engine_error(response, "Container remove").await),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct MemoryContainer {
    spec_image: String,
    running: bool,
}

/// In-memory orchestrator for tests.
#[derive(Default)]
pub struct MemoryOrchestrator {
    containers: DashMap<String, MemoryContainer>,
    pulled: DashMap<String, u32>,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pull_count(&self, image: &str) -> u32 {
        self.pulled.get(image).map(|v| *v).unwrap_or(0)
    }

    pub fn container_image(&self, name: &str) -> Option<String> {
        self.containers.get(name).map(|c| c.spec_image.clone())
    }
}

#[async_trait]
impl ContainerOrchestrator for MemoryOrchestrator {
    async fn image_pull(&self, image: &str) -> Result<()> {
        *self.pulled.entry(image.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        Ok(self.containers.contains_key(name))
    }

    async fn container_running(&self, name: &str) -> Result<bool> {
        Ok(self.containers.get(name).map(|c| c.running).unwrap_or(false))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        if self.containers.contains_key(&spec.name) {
            return Err(MedicError::new(
                ErrorCode::ContainerOperationFailed,
                format!("Container already exists: {}", spec.name),
            ));
        }
        self.containers.insert(
            spec.name.clone(),
            MemoryContainer {
                spec_image: spec.image.clone(),
                running: false,
            },
        );
        Ok(format!("mem-{}", spec.name))
    }

    async fn start(&self, name: &str) -> Result<()> {
        let mut container = self.containers.get_mut(name).ok_or_else(|| {
            MedicError::new(
                ErrorCode::ContainerNotFound,
                format!("No such container: {}", name),
            )
        })?;
        container.running = true;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        if let Some(mut container) = self.containers.get_mut(name) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.containers.remove(name);
        Ok(())
    }
}
