//! Webshell container lifecycle.
//!
//! One container per team, keyed by the sanitized team name. All state
//! lives in the runtime itself: container presence answers "does this
//! team have a shell" and labels carry ownership and expiry. Name
//! uniqueness at the daemon is the only guard against two requests
//! provisioning the same team at once.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::{Result, WebshellError};
use crate::naming::{
    container_name, CONTAINER_PREFIX, LABEL_CREATED, LABEL_EXPIRES, LABEL_TEAM, LABEL_USERNAME,
};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};

/// Seconds the runtime waits for a clean shutdown before killing.
pub const STOP_TIMEOUT_SECS: i64 = 10;

/// CFS scheduling period the CPU quota is expressed against.
const CPU_PERIOD: i64 = 100_000;

/// Hard cap on processes inside a shell, against fork bombs.
const PIDS_LIMIT: i64 = 100;

const SHORT_ID_LEN: usize = 12;

const DROPPED_CAPABILITIES: &[&str] = &["ALL"];

/// The minimal capability set a login shell plus package installs need.
const GRANTED_CAPABILITIES: &[&str] = &["CHOWN", "SETUID", "SETGID", "DAC_OVERRIDE", "FOWNER"];

/// Status of one team's container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerInfo {
    pub container_id: String,
    pub status: String,
    pub team_name: String,
    pub username: String,
    pub webshell_url: String,
    pub created_at: String,
    pub expires_at: String,
}

/// What `create` did for the team.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub container_id: String,
    pub webshell_url: String,
    /// The team already had a container; it was reused (and started if
    /// it had stopped) instead of provisioning a new one.
    pub already_exists: bool,
}

/// One row of the admin listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSummary {
    pub team: String,
    pub username: String,
    pub container_id: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
}

/// Outcome of one expiry sweep. Per-container failures land in `errors`
/// without aborting the rest of the sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub cleaned: Vec<String>,
    pub errors: Vec<SweepError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepError {
    pub team: String,
    pub error: String,
}

/// Provisions, inspects and reclaims webshell containers.
pub struct WebshellManager {
    runtime: Arc<dyn ContainerRuntime>,
    base_url: String,
    network: String,
    image: String,
    memory_bytes: i64,
    cpu_quota: i64,
    ttl: chrono::Duration,
}

impl WebshellManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &ServiceConfig) -> Result<Self> {
        let memory_bytes = config.memory_limit_bytes().ok_or_else(|| {
            WebshellError::InvalidConfig(format!(
                "memory_limit `{}` is not a valid size",
                config.memory_limit
            ))
        })?;
        Ok(Self {
            runtime,
            base_url: config.webshell_base_url.trim_end_matches('/').to_string(),
            network: config.network_name.clone(),
            image: config.image.clone(),
            memory_bytes,
            cpu_quota: config.cpu_quota(),
            ttl: config.ttl(),
        })
    }

    /// Public URL the reverse proxy serves this team's shell under.
    pub fn webshell_url(&self, team: &str) -> String {
        format!("{}/{}", self.base_url, team)
    }

    /// Status of the team's container, or `None` when it has none.
    pub async fn status(&self, team: &str) -> Result<Option<ContainerInfo>> {
        let name = container_name(team);
        match self.runtime.find_container(&name).await? {
            Some(handle) => Ok(Some(self.describe(team, &handle))),
            None => Ok(None),
        }
    }

    /// Provision the team's container, or reuse the existing one.
    ///
    /// Two concurrent calls for the same team may both pass the lookup;
    /// the runtime's name uniqueness then rejects one of the creates, and
    /// the loser adopts the winner's container.
    pub async fn create(&self, team: &str, username: &str) -> Result<CreateOutcome> {
        let name = container_name(team);

        if let Some(existing) = self.runtime.find_container(&name).await? {
            return self.adopt_existing(team, &name, existing).await;
        }

        let spec = self.container_spec(&name, team, username);
        let id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(WebshellError::NameConflict(_)) => {
                match self.runtime.find_container(&name).await? {
                    Some(existing) => return self.adopt_existing(team, &name, existing).await,
                    // Conflicted but now gone; let the caller retry.
                    None => return Err(WebshellError::NameConflict(name)),
                }
            }
            Err(err) => return Err(err),
        };
        self.runtime.start_container(&name).await?;

        info!(team = %team, container = %name, "created webshell container");
        Ok(CreateOutcome {
            container_id: short_id(&id),
            webshell_url: self.webshell_url(team),
            already_exists: false,
        })
    }

    /// Stop and remove the team's container. `Ok(false)` when the team
    /// had none; an absent container is never an error here.
    pub async fn delete(&self, team: &str) -> Result<bool> {
        let name = container_name(team);
        if self.runtime.find_container(&name).await?.is_none() {
            return Ok(false);
        }
        match self.stop_and_remove(&name).await {
            Ok(()) => {
                info!(team = %team, container = %name, "removed webshell container");
                Ok(true)
            }
            // Vanished while we were stopping it, which is the outcome
            // the caller wanted anyway.
            Err(WebshellError::NotFound(_)) => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Restart the team's container. Unlike `delete`, an absent
    /// container is an error: there is nothing to restart.
    pub async fn restart(&self, team: &str) -> Result<()> {
        let name = container_name(team);
        if self.runtime.find_container(&name).await?.is_none() {
            return Err(WebshellError::NotFound(name));
        }
        self.runtime.restart_container(&name, STOP_TIMEOUT_SECS).await
    }

    /// All webshell containers, running or not.
    pub async fn list_all(&self) -> Result<Vec<ContainerSummary>> {
        let containers = self.runtime.list_containers(CONTAINER_PREFIX).await?;
        Ok(containers
            .iter()
            // The daemon name filter matches substrings; keep only real
            // webshell names.
            .filter(|c| c.name.starts_with(CONTAINER_PREFIX))
            .map(summarize)
            .collect())
    }

    /// Reclaim every container whose expiry label lies in the past.
    ///
    /// Containers without a parsable expiry label are left alone: a
    /// missing label means unknown provenance, and guessing an expiry
    /// would reclaim someone's shell mid-competition.
    pub async fn cleanup_expired(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let containers = self.runtime.list_containers(CONTAINER_PREFIX).await?;
        let mut report = SweepReport::default();

        for handle in containers.iter().filter(|c| c.name.starts_with(CONTAINER_PREFIX)) {
            let team = handle.label(LABEL_TEAM).unwrap_or("unknown").to_string();
            let Some(expiry) = handle.label(LABEL_EXPIRES).and_then(parse_label_datetime) else {
                continue;
            };
            if now <= expiry {
                continue;
            }
            match self.stop_and_remove(&handle.name).await {
                Ok(()) => {
                    info!(team = %team, container = %handle.name, "reclaimed expired webshell");
                    report.cleaned.push(team);
                }
                // Already gone, likely to a concurrent delete.
                Err(WebshellError::NotFound(_)) => report.cleaned.push(team),
                Err(err) => {
                    warn!(
                        team = %team,
                        container = %handle.name,
                        error = %err,
                        "failed to reclaim expired webshell"
                    );
                    report.errors.push(SweepError {
                        team,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn adopt_existing(
        &self,
        team: &str,
        name: &str,
        existing: ContainerHandle,
    ) -> Result<CreateOutcome> {
        if !existing.is_running() {
            self.runtime.start_container(name).await?;
        }
        Ok(CreateOutcome {
            container_id: short_id(&existing.id),
            webshell_url: self.webshell_url(team),
            already_exists: true,
        })
    }

    async fn stop_and_remove(&self, name: &str) -> Result<()> {
        self.runtime.stop_container(name, STOP_TIMEOUT_SECS).await?;
        self.runtime.remove_container(name).await
    }

    fn describe(&self, team: &str, handle: &ContainerHandle) -> ContainerInfo {
        ContainerInfo {
            container_id: short_id(&handle.id),
            status: handle.status.clone(),
            team_name: handle.label(LABEL_TEAM).unwrap_or(team).to_string(),
            username: handle.label(LABEL_USERNAME).unwrap_or("user").to_string(),
            webshell_url: self.webshell_url(team),
            created_at: handle.label(LABEL_CREATED).unwrap_or_default().to_string(),
            expires_at: handle.label(LABEL_EXPIRES).unwrap_or_default().to_string(),
        }
    }

    fn container_spec(&self, name: &str, team: &str, username: &str) -> ContainerSpec {
        let now = Utc::now();
        let expires = now + self.ttl;

        let mut labels = HashMap::new();
        labels.insert(LABEL_TEAM.to_string(), team.to_string());
        labels.insert(LABEL_USERNAME.to_string(), username.to_string());
        labels.insert(LABEL_CREATED.to_string(), format_label_datetime(now));
        labels.insert(LABEL_EXPIRES.to_string(), format_label_datetime(expires));

        ContainerSpec {
            name: name.to_string(),
            image: self.image.clone(),
            network: self.network.clone(),
            memory_bytes: self.memory_bytes,
            cpu_quota: self.cpu_quota,
            cpu_period: CPU_PERIOD,
            pids_limit: PIDS_LIMIT,
            env: vec![format!("USERNAME={username}"), format!("TEAM_NAME={team}")],
            labels,
            restart_policy: "unless-stopped".to_string(),
            cap_drop: DROPPED_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
            cap_add: GRANTED_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
            security_opt: vec!["no-new-privileges:true".to_string()],
        }
    }
}

fn summarize(handle: &ContainerHandle) -> ContainerSummary {
    ContainerSummary {
        team: handle.label(LABEL_TEAM).unwrap_or("unknown").to_string(),
        username: handle.label(LABEL_USERNAME).unwrap_or("unknown").to_string(),
        container_id: short_id(&handle.id),
        status: handle.status.clone(),
        created_at: handle.label(LABEL_CREATED).unwrap_or_default().to_string(),
        expires_at: handle.label(LABEL_EXPIRES).unwrap_or_default().to_string(),
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

fn format_label_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp label. Accepts RFC 3339 and the offset-less ISO
/// form older containers carry; both are read as UTC.
pub(crate) fn parse_label_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
