//! Server configuration.
//!
//! Values come from an optional TOML file, then from `ESTATE__`-prefixed
//! environment variables (`ESTATE__SERVER__PORT=8080`), then from the legacy
//! variable names the dashboard deployments already set.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use config::builder::DefaultState;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use estate_auth_core::{ClaimMapping, PasswordPolicy};
use estate_identity_cognito::CognitoConfig;
use estate_identity_local::{LocalProviderConfig, NewUser};
use estate_identity_session::{DEFAULT_LOGIN_PATH, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

const MAX_SKEW_SECONDS: i64 = 60 * 60;
const MAX_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const MAX_IDLE_TIMEOUT_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub bff: BffConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where values came from, logged once tracing is up
    #[serde(skip)]
    sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Cognito user pool over its JSON API
    Cognito,
    /// In-process accounts, for development and demos
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Explicit region; otherwise taken from `issuer`
    #[serde(default)]
    pub region: Option<String>,

    /// User pool issuer URL, `https://cognito-idp.{region}.amazonaws.com/{pool}`
    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Overrides the provider endpoint, e.g. for an emulator
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_identity_timeout")]
    pub timeout_seconds: u64,

    /// Password policy of the user pool
    #[serde(default)]
    pub policy: PasswordPolicy,

    #[serde(default)]
    pub local: LocalIdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalIdentityConfig {
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_seconds: i64,

    /// Accounts created at startup
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub identifier: String,
    pub secret: String,

    /// The first sign-in demands a new secret
    #[serde(default)]
    pub temporary: bool,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub agency: Option<String>,

    #[serde(default)]
    pub groups: Vec<String>,
}

impl std::fmt::Debug for SeedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedUser")
            .field("identifier", &self.identifier)
            .field("temporary", &self.temporary)
            .field("agency", &self.agency)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Refresh this many seconds before the ID token expires
    #[serde(default = "default_skew")]
    pub skew_seconds: i64,

    #[serde(default = "default_login_path")]
    pub login_path: String,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default = "default_true")]
    pub secure_cookies: bool,

    /// Server-side sessions untouched for this long are dropped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: i64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    #[serde(default)]
    pub claims: ClaimMapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BffConfig {
    #[serde(default = "default_bff_url")]
    pub base_url: String,

    #[serde(default = "default_bff_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level name or a full `EnvFilter` directive string
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    3000
}

fn default_provider() -> ProviderKind {
    ProviderKind::Cognito
}

fn default_identity_timeout() -> u64 {
    30
}

fn default_signing_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_token_ttl() -> i64 {
    3600
}

fn default_skew() -> i64 {
    60
}

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_string()
}

fn default_cookie_name() -> String {
    "estate_session".to_string()
}

fn default_idle_timeout() -> i64 {
    8 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_bff_url() -> String {
    "http://localhost:4000/".to_string()
}

fn default_bff_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            region: None,
            issuer: None,
            client_id: String::new(),
            client_secret: String::new(),
            endpoint: None,
            timeout_seconds: default_identity_timeout(),
            policy: PasswordPolicy::default(),
            local: LocalIdentityConfig::default(),
        }
    }
}

impl Default for LocalIdentityConfig {
    fn default() -> Self {
        Self {
            signing_secret: default_signing_secret(),
            token_ttl_seconds: default_token_ttl(),
            users: vec![],
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            skew_seconds: default_skew(),
            login_path: default_login_path(),
            cookie_name: default_cookie_name(),
            secure_cookies: true,
            idle_timeout_seconds: default_idle_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            claims: ClaimMapping::default(),
        }
    }
}

impl Default for BffConfig {
    fn default() -> Self {
        Self {
            base_url: default_bff_url(),
            timeout_seconds: default_bff_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SeedUser {
    pub fn to_new_user(&self) -> NewUser {
        let mut user = NewUser::new(&self.identifier, &self.secret);
        if self.temporary {
            user = user.temporary();
        }
        if let Some(email) = &self.email {
            user = user.email(email);
        }
        if let Some(name) = &self.display_name {
            user = user.display_name(name);
        }
        if let Some(agency) = &self.agency {
            user = user.agency(agency);
        }
        for group in &self.groups {
            user = user.group(group);
        }
        user
    }
}

impl Config {
    /// Load configuration from `path` (or `config.toml` when present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();
        let file = match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
                Some(path.display().to_string())
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
                Some(DEFAULT_CONFIG_FILE.to_string())
            }
            None => None,
        };

        builder = builder.add_source(
            Environment::with_prefix("ESTATE")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings = Self::deserialize(builder)?;
        settings.sources.push(match file {
            Some(file) => format!("file {file}"),
            None => "defaults".to_string(),
        });
        settings.apply_env_overrides()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Parse and validate a TOML document, without consulting the environment.
    pub fn from_toml(source: &str) -> Result<Self> {
        let builder = ConfigBuilder::builder().add_source(File::from_str(source, FileFormat::Toml));
        let settings = Self::deserialize(builder)?;
        settings.validate()?;
        Ok(settings)
    }

    fn deserialize(builder: config::builder::ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Variable names used by existing dashboard deployments.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(client_id) = std::env::var("COGNITO_CLIENT_ID") {
            self.sources.push("env COGNITO_CLIENT_ID".to_string());
            self.identity.client_id = client_id;
        }

        if let Ok(client_secret) = std::env::var("COGNITO_CLIENT_SECRET") {
            self.sources.push("env COGNITO_CLIENT_SECRET".to_string());
            self.identity.client_secret = client_secret;
        }

        if let Ok(issuer) = std::env::var("COGNITO_ISSUER") {
            self.sources.push("env COGNITO_ISSUER".to_string());
            self.identity.issuer = Some(issuer);
        }

        if let Ok(region) = std::env::var("NEXT_PUBLIC_COGNITO_REGION") {
            self.sources.push("env NEXT_PUBLIC_COGNITO_REGION".to_string());
            self.identity.region = Some(region);
        }

        if let Ok(base_url) = std::env::var("DASHBOARD_MGT_BFF")
            .or_else(|_| std::env::var("NEXT_PUBLIC_DASHBOARD_MGT_BFF"))
        {
            self.sources.push("env DASHBOARD_MGT_BFF".to_string());
            self.bff.base_url = base_url;
        }

        if let Ok(port) = std::env::var("PORT") {
            self.sources.push("env PORT".to_string());
            self.server.port = port.parse().context("Invalid PORT value")?;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.sources.push("env RUST_LOG".to_string());
            self.logging.level = log_level;
        }

        Ok(())
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Report where the configuration came from. Call after tracing is initialised.
    pub fn log_sources(&self) {
        for source in &self.sources {
            info!(source = %source, "configuration source");
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        match self.identity.provider {
            ProviderKind::Cognito => self
                .cognito_config()
                .validate()
                .context("Invalid identity configuration")?,
            ProviderKind::Local => {
                if !cfg!(debug_assertions)
                    && self.identity.local.signing_secret == default_signing_secret()
                {
                    anyhow::bail!("Local signing secret must be changed from default in production");
                }
                let ttl = self.identity.local.token_ttl_seconds;
                if !(1..=MAX_TOKEN_TTL_SECONDS).contains(&ttl) {
                    anyhow::bail!(
                        "Local token TTL must be between 1 and {MAX_TOKEN_TTL_SECONDS} seconds"
                    );
                }
                for user in &self.identity.local.users {
                    if user.identifier.is_empty() {
                        anyhow::bail!("Seed user identifier cannot be empty");
                    }
                    if user.secret.is_empty() {
                        anyhow::bail!("Seed user '{}' has an empty secret", user.identifier);
                    }
                }
            }
        }

        if !(0..=MAX_SKEW_SECONDS).contains(&self.session.skew_seconds) {
            anyhow::bail!("Refresh skew must be between 0 and {MAX_SKEW_SECONDS} seconds");
        }

        if !(1..=MAX_IDLE_TIMEOUT_SECONDS).contains(&self.session.idle_timeout_seconds) {
            anyhow::bail!(
                "Session idle timeout must be between 1 and {MAX_IDLE_TIMEOUT_SECONDS} seconds"
            );
        }

        if self.session.sweep_interval_seconds == 0 {
            anyhow::bail!("Session sweep interval must be greater than 0");
        }

        if !self.session.login_path.starts_with('/') {
            anyhow::bail!(
                "Login path '{}' must be an absolute path",
                self.session.login_path
            );
        }

        if self.session.cookie_name.is_empty() {
            anyhow::bail!("Session cookie name cannot be empty");
        }

        reqwest::Url::parse(&self.bff.base_url)
            .with_context(|| format!("Invalid BFF base URL '{}'", self.bff.base_url))?;

        if self.bff.timeout_seconds == 0 {
            anyhow::bail!("BFF timeout must be greater than 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.logging.level.to_lowercase();
        let is_directive = level.contains('=') || level.contains(',');
        if !is_directive && !valid_levels.contains(&level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        Ok(())
    }

    pub fn cognito_config(&self) -> CognitoConfig {
        let identity = &self.identity;
        let mut config = CognitoConfig::new(&identity.client_id, &identity.client_secret)
            .with_timeout(identity.timeout_seconds)
            .with_policy(identity.policy.clone());

        if let Some(issuer) = &identity.issuer {
            config = config.with_issuer(issuer);
        }
        if let Some(region) = &identity.region {
            config = config.with_region(region);
        }
        if let Some(endpoint) = &identity.endpoint {
            config = config.with_endpoint(endpoint);
        }
        config
    }

    pub fn local_config(&self) -> LocalProviderConfig {
        LocalProviderConfig::default()
            .with_signing_secret(&self.identity.local.signing_secret)
            .with_token_ttl(Duration::seconds(self.identity.local.token_ttl_seconds))
            .with_policy(self.identity.policy.clone())
            .with_claim_mapping(self.session.claims.clone())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            skew: Duration::seconds(self.session.skew_seconds),
            login_path: self.session.login_path.clone(),
            claim_mapping: self.session.claims.clone(),
            password_policy: self.identity.policy.clone(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::seconds(self.session.idle_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session.sweep_interval_seconds)
    }

    /// Get the socket address for the server
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.server.host, self.server.port))
    }

    /// Get the log filter string for tracing
    pub fn log_filter(&self) -> String {
        let level = &self.logging.level;
        if level.contains('=') || level.contains(',') {
            level.clone()
        } else {
            format!(
                "estate_dashboard_server={level},estate_identity_session={level},\
                 estate_identity_cognito={level},estate_identity_local={level},\
                 tower_http={level},warn"
            )
        }
    }
}
