//! CTFd identity validation.
//!
//! The service trusts CTFd for who a player is: a request token is
//! resolved by asking CTFd for the user behind it, then for that user's
//! team. Anything short of a fully validated identity comes back as
//! `None`; the caller decides how to answer.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Who a CTFd access token belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenIdentity {
    pub user_id: i64,
    pub username: String,
    /// Team id as a string, or `user_<id>` for players without a team.
    pub team_id: String,
    pub team_name: String,
}

/// Envelope CTFd wraps every API payload in.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: i64,
    name: Option<String>,
    team_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TeamData {
    name: String,
}

/// Client for the CTFd REST API.
pub struct CtfdClient {
    http: Client,
    base_url: String,
}

impl CtfdClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a token to the player and team behind it.
    ///
    /// `None` covers every failure mode, from a bad or expired token to
    /// CTFd being unreachable; the distinction only matters in the logs.
    pub async fn validate_token(&self, token: &str) -> Option<TokenIdentity> {
        match self.fetch_identity(token).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "token validation against CTFd failed");
                None
            }
        }
    }

    async fn fetch_identity(&self, token: &str) -> Result<Option<TokenIdentity>> {
        let response = self
            .http
            .get(format!("{}/api/v1/users/me", self.base_url))
            .header("Authorization", format!("Token {token}"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let envelope: Envelope<UserData> = response.json().await?;
        let user = match envelope.data {
            Some(user) if envelope.success => user,
            _ => return Ok(None),
        };

        let team = match user.team_id {
            Some(team_id) => self
                .fetch_team_name(token, team_id)
                .await?
                .map(|name| (team_id, name)),
            None => None,
        };

        Ok(Some(resolve_identity(user, team)))
    }

    async fn fetch_team_name(&self, token: &str, team_id: i64) -> Result<Option<String>> {
        let response = self
            .http
            .get(format!("{}/api/v1/teams/{team_id}", self.base_url))
            .header("Authorization", format!("Token {token}"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let envelope: Envelope<TeamData> = response.json().await?;
        Ok(envelope
            .data
            .filter(|_| envelope.success)
            .map(|team| team.name)
            .filter(|name| !name.is_empty()))
    }
}

/// Combine the user record with an optionally resolved team. Players
/// without a team act as a team of one named after themselves.
fn resolve_identity(user: UserData, team: Option<(i64, String)>) -> TokenIdentity {
    let username = user.name.unwrap_or_else(|| "user".to_string());
    match team {
        Some((team_id, team_name)) => TokenIdentity {
            user_id: user.id,
            username,
            team_id: team_id.to_string(),
            team_name,
        },
        None => TokenIdentity {
            user_id: user.id,
            team_id: format!("user_{}", user.id),
            team_name: username.clone(),
            username,
        },
    }
}
