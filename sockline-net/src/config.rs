//! Load config from file and environment.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sockline_core::Protocol;

use crate::error::{Error, Result};

/// Which side of a connection the binary plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            other => Err(Error::Config(format!("unknown role: {other}"))),
        }
    }
}

/// Binary configuration. File: ~/.config/sockline/config.toml or /etc/sockline/config.toml.
/// Env overrides: SOCKLINE_ROLE, SOCKLINE_PROTOCOL, SOCKLINE_HOST, SOCKLINE_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    /// Host name or IP; for `unix`, the socket path.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port (default 7878). Ignored by `unix` when 0.
    #[serde(default = "default_port")]
    pub port: u16,
    /// PEM CA bundle a TLS client trusts.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// PEM certificate chain a TLS server presents.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default = "default_verify_peer")]
    pub verify_peer: bool,
    /// Capacity of the message and event queues.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_role() -> Role {
    Role::Server
}
fn default_protocol() -> Protocol {
    Protocol::Tcp
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7878
}
fn default_verify_peer() -> bool {
    true
}
fn default_queue_capacity() -> usize {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: default_role(),
            protocol: default_protocol(),
            host: default_host(),
            port: default_port(),
            ca_file: None,
            cert_file: None,
            key_file: None,
            verify_peer: default_verify_peer(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply SOCKLINE_* overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = lookup("SOCKLINE_ROLE") {
            self.role = s.parse()?;
        }
        if let Some(s) = lookup("SOCKLINE_PROTOCOL") {
            self.protocol = s.parse()?;
        }
        if let Some(s) = lookup("SOCKLINE_HOST") {
            self.host = s;
        }
        if let Some(s) = lookup("SOCKLINE_PORT") {
            self.port = s
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {s}")))?;
        }
        Ok(())
    }
}

/// Load config: default, then the first existing config file, then env vars.
pub fn load() -> Result<Config> {
    let mut c = match load_file()? {
        Some(c) => c,
        None => Config::default(),
    };
    c.apply_env()?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sockline/config.toml"));
    }
    out.push(PathBuf::from("/etc/sockline/config.toml"));
    out
}

fn load_file() -> Result<Option<Config>> {
    for p in config_paths() {
        if p.exists() {
            let s = read_file(&p)?;
            let c = Config::from_toml_str(&s).map_err(|e| Error::Config(format!("{}: {e}", p.display())))?;
            return Ok(Some(c));
        }
    }
    Ok(None)
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::Config(format!("read {}: {e}", path.display())))
}

/// Read PEM material named by a config key.
pub fn read_pem(path: Option<&Path>, key: &str) -> Result<Vec<u8>> {
    let path = path.ok_or_else(|| Error::Config(format!("{key} is required for tls")))?;
    std::fs::read(path).map_err(|e| Error::Config(format!("read {key} {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let c = Config::from_toml_str("").unwrap();
        assert_eq!(c.role, Role::Server);
        assert_eq!(c.protocol, Protocol::Tcp);
        assert_eq!(c.host, "127.0.0.1");
        assert_eq!(c.port, 7878);
        assert!(c.verify_peer);
        assert_eq!(c.queue_capacity, 64);
    }

    #[test]
    fn file_values_are_read() {
        let c = Config::from_toml_str(
            r#"
            role = "client"
            protocol = "tls"
            host = "example.org"
            port = 443
            ca_file = "/tmp/ca.pem"
            verify_peer = false
            "#,
        )
        .unwrap();
        assert_eq!(c.role, Role::Client);
        assert_eq!(c.protocol, Protocol::Tls);
        assert_eq!(c.port, 443);
        assert_eq!(c.ca_file.as_deref(), Some(Path::new("/tmp/ca.pem")));
        assert!(!c.verify_peer);
    }

    #[test]
    fn unknown_keys_and_protocols_are_rejected() {
        assert!(matches!(Config::from_toml_str("colour = 1"), Err(Error::Config(_))));
        assert!(matches!(Config::from_toml_str("protocol = \"sctp\""), Err(Error::Config(_))));
    }

    #[test]
    fn overrides_win_over_file() {
        let env: HashMap<&str, &str> = [
            ("SOCKLINE_ROLE", "client"),
            ("SOCKLINE_PROTOCOL", "UDP"),
            ("SOCKLINE_PORT", "9000"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::from_toml_str("host = \"10.0.0.1\"").unwrap();
        c.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.role, Role::Client);
        assert_eq!(c.protocol, Protocol::Udp);
        assert_eq!(c.port, 9000);
        assert_eq!(c.host, "10.0.0.1");
    }

    #[test]
    fn bad_overrides_are_errors() {
        let mut c = Config::default();
        assert!(matches!(
            c.apply_overrides(|k| (k == "SOCKLINE_PROTOCOL").then(|| "carrier-pigeon".to_string())),
            Err(Error::UnknownProtocol(_))
        ));
        assert!(matches!(
            c.apply_overrides(|k| (k == "SOCKLINE_PORT").then(|| "70000".to_string())),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_pem_path_is_a_config_error() {
        assert!(matches!(read_pem(None, "ca_file"), Err(Error::Config(_))));
    }
}
