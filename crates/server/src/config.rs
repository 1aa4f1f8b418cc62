//! Server configuration from environment variables.

use std::net::SocketAddr;

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Token every socket must present. `None` accepts any non-empty token.
    pub access_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], 5000).into(),
            access_token: None,
        }
    }
}

impl ServerConfig {
    /// Read the configuration.
    ///
    /// Environment variables:
    /// - `KINDERLINK_BIND`: listen address (default: "0.0.0.0:5000")
    /// - `KINDERLINK_ACCESS_TOKEN`: required socket token (default: any)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind = std::env::var("KINDERLINK_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
        let bind = bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid KINDERLINK_BIND {:?}: {}", bind, e))?;
        let access_token = std::env::var("KINDERLINK_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Ok(Self { bind, access_token })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Whether `token` may open a socket.
    pub fn accepts(&self, token: Option<&str>) -> bool {
        match (token, &self.access_token) {
            (None, _) => false,
            (Some(""), _) => false,
            (Some(given), Some(expected)) => given == expected,
            (Some(_), None) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_server_needs_some_token() {
        let config = ServerConfig::default();
        assert!(config.accepts(Some("anything")));
        assert!(!config.accepts(Some("")));
        assert!(!config.accepts(None));
    }

    #[test]
    fn configured_token_must_match() {
        let config = ServerConfig::default().with_access_token("kita");
        assert!(config.accepts(Some("kita")));
        assert!(!config.accepts(Some("other")));
    }
}
