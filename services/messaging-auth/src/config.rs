use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use common_auth::UserManagementSettings;
use common_config::{env_override, ConfigError, ServiceConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingAuthConfig {
    pub bind_address: String,
    pub port: u16,
    pub user_management: UserManagementConfig,
    /// Serve HTTPS when present, plain HTTP otherwise.
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserManagementConfig {
    pub url: String,
    pub timeout_ms: u64,
    pub service_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Require client certificates signed by this CA.
    #[serde(default)]
    pub client_ca_path: Option<PathBuf>,
}

impl Default for MessagingAuthConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 10000,
            user_management: UserManagementConfig::default(),
            tls: None,
        }
    }
}

impl Default for UserManagementConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:20001".to_string(),
            timeout_ms: 5000,
            service_token: None,
        }
    }
}

impl MessagingAuthConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.bind_address, self.port).parse()
    }
}

impl UserManagementConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settings(&self) -> UserManagementSettings {
        UserManagementSettings {
            base_url: self.url.clone(),
            timeout: self.timeout(),
            service_token: self.service_token.clone(),
        }
    }
}

impl ServiceConfig for MessagingAuthConfig {
    const PREFIX: &'static str = "MESSAGING_AUTH_";

    fn apply_environment_overrides(&mut self, prefix: &str) {
        if let Some(bind_address) = env_override(&format!("{prefix}BIND_ADDRESS")) {
            self.bind_address = bind_address;
        }
        if let Some(port) = env_override(&format!("{prefix}PORT")) {
            self.port = port;
        }
        if let Some(url) = env_override(&format!("{prefix}USER_MANAGEMENT_URL")) {
            self.user_management.url = url;
        }
        if let Some(timeout_ms) = env_override(&format!("{prefix}USER_MANAGEMENT_TIMEOUT_MS")) {
            self.user_management.timeout_ms = timeout_ms;
        }
        if let Some(token) = env_override(&format!("{prefix}USER_MANAGEMENT_SERVICE_TOKEN")) {
            self.user_management.service_token = Some(token);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.user_management.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "user_management.timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
