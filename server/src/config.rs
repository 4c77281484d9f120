//! Runtime settings for the relay server.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DISTINGUISHED_ROLE: &str = "Red";
pub const DEFAULT_ROLE: &str = "Blue";

/// Peers registered before a join, at or below which the newcomer gets the
/// distinguished role. Covers the first and second connectors.
const DISTINGUISHED_ROLE_THRESHOLD: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind to
    pub host: String,
    /// Port to listen on; 0 picks a free port
    pub port: u16,
    /// Upper bound on the wait for a new peer's username. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// Role label sent to the first two peers to join
    pub distinguished_role: String,
    /// Role label sent to every later peer
    pub default_role: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            distinguished_role: DEFAULT_DISTINGUISHED_ROLE.to_string(),
            default_role: DEFAULT_ROLE.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Role for a peer that joins while `registered_before` peers are present.
    pub fn role_for(&self, registered_before: usize) -> &str {
        if registered_before <= DISTINGUISHED_ROLE_THRESHOLD {
            &self.distinguished_role
        } else {
            &self.default_role
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_first_two_joiners_get_distinguished_role() {
        let config = ServerConfig::default();
        assert_eq!(config.role_for(0), "Red");
        assert_eq!(config.role_for(1), "Red");
        assert_eq!(config.role_for(2), "Blue");
        assert_eq!(config.role_for(17), "Blue");
    }

    #[test]
    fn test_custom_roles() {
        let config = ServerConfig {
            distinguished_role: "RoleA".to_string(),
            default_role: "RoleB".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.role_for(1), "RoleA");
        assert_eq!(config.role_for(2), "RoleB");
    }
}
