use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use push_apns::{ClientSettings, PoolSettings, topic_from_pem};
use push_core::{Credential, Endpoint, PushError, RetryPolicy, Target};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DeliveryConfig;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "PUSH_SERVER_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Config file not found at {0}")]
    NotFound(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Material {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Application {application}: {reason}")]
    Application { application: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationConfig>,
    /// Used when a request names no application.
    pub default_application: Option<String>,
    /// Directory relative credential paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Defaults to `max_concurrent_streams`.
    pub concurrency: Option<usize>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_transport_attempts")]
    pub transport_attempts: u32,
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Bundle ID. Certificate applications may omit it.
    pub topic: Option<String>,
    #[serde(default)]
    pub sandbox: bool,
    /// `.p8` signing key.
    pub key_path: Option<PathBuf>,
    pub key_id: Option<String>,
    pub team_id: Option<String>,
    /// PEM bundle with certificate and private key.
    pub certificate_path: Option<PathBuf>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_database_url() -> String {
    "push.db".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_transport_attempts() -> u32 {
    3
}

fn default_max_concurrent_streams() -> usize {
    1000
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database_url: default_database_url(),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            concurrency: None,
            retry_attempts: default_retry_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            transport_attempts: default_transport_attempts(),
            max_concurrent_streams: default_max_concurrent_streams(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl DeliverySettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            base_delay: Duration::from_millis(self.base_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            jitter: true,
        }
    }

    pub fn engine_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            concurrency: self.concurrency.unwrap_or(self.max_concurrent_streams),
            retry: self.retry_policy(),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            pool: PoolSettings {
                max_concurrent_streams: self.max_concurrent_streams,
                idle_timeout: Duration::from_secs(self.idle_timeout_secs),
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            transport_retry: RetryPolicy {
                max_retries: self.transport_attempts.saturating_sub(1),
                ..self.retry_policy()
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("push-server")
            .join("config.toml")
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn read_material(&self, path: &Path) -> Result<Vec<u8>, ConfigError> {
        let path = self.resolve_path(path);
        std::fs::read(&path).map_err(|source| ConfigError::Material { path, source })
    }

    /// Load every application's credential material.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let mut applications = BTreeMap::new();

        for (id, app) in &self.applications {
            let invalid = |reason: &str| ConfigError::Application {
                application: id.clone(),
                reason: reason.to_string(),
            };

            let (credential, topic) = match (&app.key_path, &app.certificate_path) {
                (Some(key_path), None) => {
                    let (Some(key_id), Some(team_id)) = (&app.key_id, &app.team_id) else {
                        return Err(invalid("token credentials need key_id and team_id"));
                    };
                    let topic = app
                        .topic
                        .clone()
                        .ok_or_else(|| invalid("token credentials need a topic"))?;
                    let key = self.read_material(key_path)?;
                    (Credential::token(key, key_id.as_str(), team_id.as_str()), topic)
                }
                (None, Some(certificate_path)) => {
                    let pem = self.read_material(certificate_path)?;
                    let topic = match &app.topic {
                        Some(topic) => topic.clone(),
                        None => topic_from_pem(&pem).map_err(|e| invalid(&e.to_string()))?,
                    };
                    (Credential::certificate(pem), topic)
                }
                (Some(_), Some(_)) => {
                    return Err(invalid("set either key_path or certificate_path, not both"));
                }
                (None, None) => return Err(invalid("no credential configured")),
            };

            tracing::debug!(application_id = %id, topic = %topic, sandbox = app.sandbox, "loaded application credential");
            applications.insert(
                id.clone(),
                ResolvedApplication {
                    credential: Arc::new(credential),
                    topic,
                    endpoint: Endpoint::from_sandbox(app.sandbox),
                },
            );
        }

        if let Some(default) = &self.default_application {
            if !applications.contains_key(default) {
                return Err(ConfigError::Application {
                    application: default.clone(),
                    reason: "default_application is not configured".to_string(),
                });
            }
        }

        Ok(Credentials {
            applications,
            default_application: self.default_application.clone(),
        })
    }
}

/// Credential, topic, and environment lookup per application.
pub trait CredentialSource: Send + Sync {
    /// Application a request without an explicit id falls back to.
    fn resolve_application_id(&self, application_id: Option<&str>) -> Result<String, PushError>;

    fn resolve_credential(&self, application_id: Option<&str>) -> Result<Arc<Credential>, PushError>;

    fn resolve_topic(&self, application_id: Option<&str>) -> Result<String, PushError>;

    fn use_sandbox(&self, application_id: Option<&str>) -> Result<bool, PushError>;

    /// Full target, with optional credential and topic overrides.
    ///
    /// The environment always comes from the resolved application.
    fn target(
        &self,
        application_id: Option<&str>,
        credential: Option<Arc<Credential>>,
        topic: Option<&str>,
    ) -> Result<Target, PushError> {
        let id = self.resolve_application_id(application_id)?;
        let application = Some(id.as_str());

        let credential = match credential {
            Some(credential) => credential,
            None => self.resolve_credential(application)?,
        };
        let topic = match topic {
            Some(topic) => topic.to_string(),
            None => self.resolve_topic(application)?,
        };
        let endpoint = Endpoint::from_sandbox(self.use_sandbox(application)?);

        Ok(Target::new(credential, topic, endpoint).with_application_id(id))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedApplication {
    pub credential: Arc<Credential>,
    pub topic: String,
    pub endpoint: Endpoint,
}

/// Loaded application credentials.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    applications: BTreeMap<String, ResolvedApplication>,
    default_application: Option<String>,
}

impl Credentials {
    pub fn new(default_application: Option<String>) -> Self {
        Self {
            applications: BTreeMap::new(),
            default_application,
        }
    }

    pub fn with_application(mut self, id: impl Into<String>, application: ResolvedApplication) -> Self {
        self.applications.insert(id.into(), application);
        self
    }

    /// Explicit id, else the default, else the only configured application.
    pub fn application_id<'a>(&'a self, application_id: Option<&'a str>) -> Result<&'a str, PushError> {
        if let Some(id) = application_id.or(self.default_application.as_deref()) {
            return Ok(id);
        }

        match self.applications.keys().next() {
            Some(id) if self.applications.len() == 1 => Ok(id),
            Some(_) => Err(PushError::Configuration(
                "no application given and no default_application configured".to_string(),
            )),
            None => Err(PushError::Configuration("no applications configured".to_string())),
        }
    }

    pub fn application(&self, application_id: Option<&str>) -> Result<&ResolvedApplication, PushError> {
        let id = self.application_id(application_id)?;
        self.applications
            .get(id)
            .ok_or_else(|| PushError::Configuration(format!("unknown application {id}")))
    }
}

impl CredentialSource for Credentials {
    fn resolve_application_id(&self, application_id: Option<&str>) -> Result<String, PushError> {
        Ok(self.application_id(application_id)?.to_string())
    }

    fn resolve_credential(&self, application_id: Option<&str>) -> Result<Arc<Credential>, PushError> {
        Ok(self.application(application_id)?.credential.clone())
    }

    fn resolve_topic(&self, application_id: Option<&str>) -> Result<String, PushError> {
        Ok(self.application(application_id)?.topic.clone())
    }

    fn use_sandbox(&self, application_id: Option<&str>) -> Result<bool, PushError> {
        Ok(self.application(application_id)?.endpoint == Endpoint::Sandbox)
    }
}
