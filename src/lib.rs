//! Webshell Provisioning Service
//!
//! Gives every CTF team one sandboxed shell container on a shared docker
//! host, fronted by a small JSON API. Player identity comes from CTFd;
//! container state lives entirely in the runtime (names for uniqueness,
//! labels for ownership and expiry), so the service itself is stateless
//! and restarts clean.
//!
//! ## Key Components
//!
//! - **WebshellManager**: create/status/delete/restart plus the expiry
//!   sweep, one container per team
//! - **ContainerRuntime**: thin trait over the docker daemon so the
//!   lifecycle logic is testable without one
//! - **CtfdClient**: resolves player tokens to a team via the CTFd API
//! - **HTTP layer**: axum router with tenant endpoints and a
//!   secret-gated admin surface
//!
//! ## Usage
//!
//! ```rust,ignore
//! use webshell_api::{ServiceConfig, WebshellManager};
//! use webshell_api::runtime::DockerRuntime;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::from_env()?;
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let manager = WebshellManager::new(runtime, &config)?;
//! let outcome = manager.create("team-alpha", "player1").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod manager;
pub mod naming;
pub mod reclaim;
pub mod runtime;

pub use config::ServiceConfig;
pub use error::{Result, WebshellError};
pub use identity::{CtfdClient, TokenIdentity};
pub use manager::{
    ContainerInfo, ContainerSummary, CreateOutcome, SweepReport, WebshellManager,
};
pub use naming::{container_name, is_valid_username, sanitize_team_name};
pub use runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, DockerRuntime};
