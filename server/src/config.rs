//! Bridge configuration, read from the environment.

use std::net::SocketAddr;

use anyhow::{Context, Result};

/// Launch command line for the language server, e.g.
/// `arduino-language-server -clangd /usr/bin/clangd`.
pub const LAUNCH_COMMAND_ENV: &str = "SKETCHBRIDGE_LSP_COMMAND";

/// Listen address override.
pub const BIND_ENV: &str = "SKETCHBRIDGE_BIND";

pub const DEFAULT_PORT: u16 = 9123;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Launch command for the language server.
    ///
    /// Deliberately optional at startup: absence is a per-connection
    /// rejection (close code 4001), not a boot failure.
    pub launch_command: Option<String>,
    /// Address the HTTP/WebSocket listener binds to.
    pub bind: SocketAddr,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            std::env::var(LAUNCH_COMMAND_ENV).ok(),
            std::env::var(BIND_ENV).ok(),
        )
    }

    fn from_vars(launch_command: Option<String>, bind: Option<String>) -> Result<Self> {
        let launch_command = launch_command.filter(|cmd| !cmd.trim().is_empty());
        let bind = match bind {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("parsing {BIND_ENV}={addr}"))?,
            None => default_bind(),
        };
        Ok(Self {
            launch_command,
            bind,
        })
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_vars(None, None).unwrap();
        assert!(config.launch_command.is_none());
        assert_eq!(config.bind, "127.0.0.1:9123".parse().unwrap());
    }

    #[test]
    fn test_launch_command_kept_verbatim() {
        let config = BridgeConfig::from_vars(
            Some("arduino-language-server -clangd /usr/bin/clangd".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(
            config.launch_command.as_deref(),
            Some("arduino-language-server -clangd /usr/bin/clangd")
        );
    }

    #[test]
    fn test_blank_launch_command_treated_as_missing() {
        let config = BridgeConfig::from_vars(Some("   ".to_string()), None).unwrap();
        assert!(config.launch_command.is_none());
    }

    #[test]
    fn test_bind_override() {
        let config =
            BridgeConfig::from_vars(None, Some("0.0.0.0:8080".to_string())).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn test_invalid_bind_is_an_error() {
        assert!(BridgeConfig::from_vars(None, Some("not-an-address".to_string())).is_err());
    }
}
