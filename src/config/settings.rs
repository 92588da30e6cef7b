use serde::Deserialize;

use crate::transport::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::ConnectionTarget;
use crate::utils::error::{BroadcastError, Result};

/// Top-level configuration for a broadcast client or server.
///
/// The default carries no connection target: one has to be configured.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    pub connection: ConnectionSettings,
    pub client: ClientSettings,
    pub transport: TransportSettings,
}

/// Where to connect (client) or listen (server).
///
/// `url` is a local socket path and wins over `host`/`port`.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct ConnectionSettings {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub name: Option<String>,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TransportSettings {
    pub max_frame_size: usize,
}

/// Flat view of the recognised keys, as they appear in the environment
/// (`{PREFIX}BROADCAST_PORT`, ...) or in `config/default`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub broadcast_url: Option<String>,
    pub broadcast_host: Option<String>,
    pub broadcast_port: Option<u16>,
    pub broadcast_client_name: Option<String>,
    pub broadcast_reconnect_delay_ms: Option<u64>,
    pub broadcast_max_frame_size: Option<usize>,
}

impl ConnectionSettings {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn from_host_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            url: None,
            host: Some(host.into()),
            port: Some(port),
        }
    }

    /// Resolve the connection target.
    ///
    /// Fails when neither a url nor a host/port pair is usable.
    pub fn target(&self) -> Result<ConnectionTarget> {
        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            return Ok(ConnectionTarget::Path(url.into()));
        }

        let host = self.host.as_deref().filter(|host| !host.is_empty());
        match (host, self.port) {
            (host, Some(port)) => Ok(ConnectionTarget::HostPort {
                host: host.unwrap_or(DEFAULT_HOST).to_string(),
                port,
            }),
            (Some(host), None) => Err(BroadcastError::Configuration(format!(
                "host {host} given without a port"
            ))),
            (None, None) => Err(BroadcastError::Configuration(
                "either url or host and port must be set".to_string(),
            )),
        }
    }
}

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: None,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Settings {
    /// Settings for `connection` with every other value at its default.
    pub fn with_connection(connection: ConnectionSettings) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    pub(crate) fn merge(partial: PartialSettings) -> Self {
        let default = Self::default();
        Self {
            connection: ConnectionSettings {
                url: partial.broadcast_url.or(default.connection.url),
                host: partial.broadcast_host.or(default.connection.host),
                port: partial.broadcast_port.or(default.connection.port),
            },
            client: ClientSettings {
                name: partial.broadcast_client_name.or(default.client.name),
                reconnect_delay_ms: partial
                    .broadcast_reconnect_delay_ms
                    .unwrap_or(default.client.reconnect_delay_ms),
            },
            transport: TransportSettings {
                max_frame_size: partial
                    .broadcast_max_frame_size
                    .unwrap_or(default.transport.max_frame_size),
            },
        }
    }
}
