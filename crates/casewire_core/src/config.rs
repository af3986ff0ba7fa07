//! Channel configuration.
//!
//! A [`ChannelConfig`] carries the endpoint, the caller's identity and
//! bearer credential, and the handful of tunables the channel honors. Hosts
//! typically build it from their own session state; the struct is
//! serde-derived so it can also be persisted alongside other client settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ChannelError, Result};

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_retention_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Configuration for an [`UpdateChannel`](crate::channel::UpdateChannel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// WebSocket endpoint base, e.g. `wss://api.casewire.app/ws`.
    /// The authenticated user id is appended as a path segment.
    pub server_url: String,

    /// Id of the authenticated user. Connection is refused locally while
    /// absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Bearer token, passed as the `token` query parameter. Connection is
    /// refused locally while absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Seconds between outbound `ping` control messages while open
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Flat delay in seconds between reconnect attempts
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Reconnect budget; once spent the channel goes dormant until
    /// `connect()` is called again
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Maximum age in seconds an update record may reach before eviction
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Seconds between eviction sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl ChannelConfig {
    /// Config for `server_url` with default tunables and no identity yet.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            user_id: None,
            auth_token: None,
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }

    /// Whether both the user id and the bearer token are present.
    pub fn has_identity(&self) -> bool {
        self.user_id.is_some() && self.auth_token.is_some()
    }

    /// Build the connection URL: user id as a path segment, token as a query
    /// parameter.
    pub fn endpoint(&self) -> Result<String> {
        let (Some(user_id), Some(token)) = (&self.user_id, &self.auth_token) else {
            return Err(ChannelError::MissingIdentity);
        };

        let mut url = Url::parse(&self.server_url)?;
        url.path_segments_mut()
            .map_err(|_| ChannelError::UrlNotBase(self.server_url.clone()))?
            .push(user_id);
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.to_string())
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Retention window as a [`Duration`].
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Sweep period as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
