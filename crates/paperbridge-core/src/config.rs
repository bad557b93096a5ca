use crate::credential::{CredentialCache, CredentialSource, GitHubAppSource, StaticToken};
use crate::error::ErrorCode;
use crate::github::{DEFAULT_API_BASE, GitHubClient, RepoSlug};
use crate::lock::lock_path_for;
use crate::retry::{RetryPolicy, Sleeper};
use crate::sync::ReconcileStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "paperbridge.toml";

pub const ENV_REPO: &str = "GITHUB_REPO";
pub const ENV_APP_ID: &str = "GITHUB_APP_ID";
pub const ENV_INSTALLATION_ID: &str = "GITHUB_INSTALLATION_ID";
pub const ENV_PRIVATE_KEY_PATH: &str = "GITHUB_PRIVATE_KEY_PATH";
pub const ENV_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_DATASET: &str = "PAPERBRIDGE_DATASET";
pub const ENV_LEDGER: &str = "PAPERBRIDGE_LEDGER";
pub const ENV_BIND: &str = "PAPERBRIDGE_BIND";

/// Configuration failure carried inside `anyhow` errors so callers can
/// recover the machine code.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Invalid(_) => ErrorCode::ConfigInvalid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `owner/repo` the issues live in.
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_dataset")]
    pub dataset: PathBuf,
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
    #[serde(default)]
    pub reconcile: ReconcileStrategy,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_auth_retry")]
    pub auth_retry: RetryConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo: None,
            dataset: default_dataset(),
            ledger: default_ledger(),
            reconcile: ReconcileStrategy::default(),
            github: GitHubConfig::default(),
            server: ServerConfig::default(),
            retry: RetryConfig::default(),
            auth_retry: default_auth_retry(),
            lock: LockConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub installation_id: Option<String>,
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
    /// Static token; takes precedence over app credentials when set.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            app_id: None,
            installation_id: None,
            private_key_path: default_private_key_path(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub sync_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            operation_timeout_secs: default_operation_timeout_secs(),
            sync_on_start: default_true(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Load `path` (or defaults when it does not exist), apply environment
/// overrides and validate.
///
/// An explicitly requested file must exist; the default file is optional.
///
/// # Errors
///
/// Returns a [`ConfigError`] wrapped in `anyhow` for unreadable,
/// unparsable or invalid configuration.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_with(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut config = match path {
        Some(explicit) => read_config_file(explicit)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                read_config_file(default)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env(env);
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = toml::from_str::<Config>(&content).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(config)
}

impl Config {
    /// Overlay deployment environment variables onto file values. Blank
    /// variables are ignored.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            env(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(repo) = get(ENV_REPO) {
            self.repo = Some(repo);
        }
        if let Some(app_id) = get(ENV_APP_ID) {
            self.github.app_id = Some(app_id);
        }
        if let Some(installation_id) = get(ENV_INSTALLATION_ID) {
            self.github.installation_id = Some(installation_id);
        }
        if let Some(key_path) = get(ENV_PRIVATE_KEY_PATH) {
            self.github.private_key_path = PathBuf::from(key_path);
        }
        if let Some(token) = get(ENV_TOKEN) {
            self.github.token = Some(token);
        }
        if let Some(dataset) = get(ENV_DATASET) {
            self.dataset = PathBuf::from(dataset);
        }
        if let Some(ledger) = get(ENV_LEDGER) {
            self.ledger = PathBuf::from(ledger);
        }
        if let Some(bind) = get(ENV_BIND) {
            self.server.bind = bind;
        }
    }

    /// Reject an invalid repo slug and clamp numeric settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an invalid repo slug.
    pub fn validate(&mut self) -> Result<()> {
        if let Some(repo) = self.repo.as_deref() {
            RepoSlug::parse(repo).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        for (name, retry) in [("retry", &mut self.retry), ("auth_retry", &mut self.auth_retry)] {
            if retry.max_attempts == 0 {
                tracing::warn!(section = name, "max_attempts = 0 clamped to 1");
                retry.max_attempts = 1;
            }
        }
        if self.github.request_timeout_secs == 0 {
            self.github.request_timeout_secs = default_request_timeout_secs();
        }
        if self.server.operation_timeout_secs == 0 {
            self.server.operation_timeout_secs = default_operation_timeout_secs();
        }
        Ok(())
    }

    /// Repo slug, required by every command that talks to GitHub.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no repo is configured.
    pub fn repo_slug(&self) -> Result<RepoSlug> {
        let Some(repo) = self.repo.as_deref() else {
            return Err(ConfigError::Invalid(format!(
                "no repository configured; set {ENV_REPO} or `repo` in {DEFAULT_CONFIG_FILE}"
            ))
            .into());
        };
        RepoSlug::parse(repo).map_err(|err| ConfigError::Invalid(err.to_string()).into())
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.github.request_timeout_secs)
    }

    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.server.operation_timeout_secs)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock.timeout_ms)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.ledger)
    }

    /// GitHub client for the configured repository.
    ///
    /// # Errors
    ///
    /// See [`Self::repo_slug`].
    pub fn build_tracker(&self) -> Result<GitHubClient> {
        Ok(GitHubClient::new(
            &self.github.api_base,
            self.repo_slug()?,
            self.request_timeout(),
        ))
    }

    /// Credential cache over the configured source: the static token when
    /// set, GitHub App installation tokens otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error when neither source is configured or the app key
    /// cannot be read.
    pub fn build_credentials(&self, sleeper: Arc<dyn Sleeper>) -> Result<CredentialCache> {
        let source = self.credential_source()?;
        tracing::debug!(source = source.describe(), "credential source configured");
        Ok(CredentialCache::new(source, self.auth_retry.policy(), sleeper))
    }

    fn credential_source(&self) -> Result<Box<dyn CredentialSource>> {
        let github = &self.github;
        if let Some(token) = github.token.as_deref() {
            if github.app_id.is_some() {
                tracing::info!("{ENV_TOKEN} is set; ignoring GitHub App credentials");
            }
            return Ok(Box::new(StaticToken::new(token)));
        }

        let (Some(app_id), Some(installation_id)) =
            (github.app_id.as_deref(), github.installation_id.as_deref())
        else {
            return Err(ConfigError::Invalid(format!(
                "no GitHub credential configured; \
                 set {ENV_TOKEN} or {ENV_APP_ID} and {ENV_INSTALLATION_ID}"
            ))
            .into());
        };

        let pem = std::fs::read(&github.private_key_path).with_context(|| {
            format!(
                "Failed to read app private key {}",
                github.private_key_path.display()
            )
        })?;
        let source = GitHubAppSource::from_pem(
            app_id,
            installation_id,
            &pem,
            &github.api_base,
            self.request_timeout(),
        )
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(Box::new(source))
    }
}

/// Machine code for an error produced while loading or using the config.
#[must_use]
pub fn config_error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ConfigError>())
        .map(ConfigError::code)
}

const fn default_true() -> bool {
    true
}

fn default_dataset() -> PathBuf {
    PathBuf::from("papers.csv")
}

fn default_ledger() -> PathBuf {
    PathBuf::from(".paperbridge/ledger.db")
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("private-key.pem")
}

const fn default_request_timeout_secs() -> u64 {
    15
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

const fn default_operation_timeout_secs() -> u64 {
    20
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_backoff_ms() -> u64 {
    10_000
}

const fn default_auth_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        backoff_ms: 2_000,
    }
}

const fn default_lock_timeout_ms() -> u64 {
    2_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("paperbridge.toml");
        std::fs::write(&path, content).expect("write config");
        path
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(dir.path(), "");
        let cfg = load_config_with(Some(path.as_path()), no_env).expect("load");

        assert_eq!(cfg.dataset, PathBuf::from("papers.csv"));
        assert_eq!(cfg.reconcile, ReconcileStrategy::Ledger);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.operation_timeout(), Duration::from_secs(20));
        assert_eq!(cfg.retry.policy(), RetryPolicy::new(5, Duration::from_secs(10)));
        assert_eq!(cfg.auth_retry.max_attempts, 3);
        assert!(cfg.server.sync_on_start);
        assert_eq!(cfg.lock_path(), PathBuf::from(".paperbridge/ledger.db.lock"));
    }

    #[test]
    fn file_values_parse() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            dir.path(),
            r#"
repo = "lab/papers"
reconcile = "remote"

[retry]
max_attempts = 0
backoff_ms = 5

[server]
bind = "127.0.0.1:9000"
"#,
        );
        let cfg = load_config_with(Some(path.as_path()), no_env).expect("load");

        assert_eq!(cfg.reconcile, ReconcileStrategy::Remote);
        assert_eq!(cfg.retry.max_attempts, 1);
        assert_eq!(cfg.retry.backoff_ms, 5);
        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.repo_slug().expect("slug").full_name(), "lab/papers");
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(dir.path(), "repo = \"lab/papers\"\n");
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_REPO, "other/repo"),
            (ENV_TOKEN, "ghs_x"),
            (ENV_DATASET, "/data/papers.csv"),
            (ENV_LEDGER, "  "),
            (ENV_BIND, "0.0.0.0:1234"),
        ]);
        let cfg = load_config_with(Some(path.as_path()), |key| {
            env.get(key).map(ToString::to_string)
        })
        .expect("load");

        assert_eq!(cfg.repo.as_deref(), Some("other/repo"));
        assert_eq!(cfg.github.token.as_deref(), Some("ghs_x"));
        assert_eq!(cfg.dataset, PathBuf::from("/data/papers.csv"));
        assert_eq!(cfg.ledger, PathBuf::from(".paperbridge/ledger.db"));
        assert_eq!(cfg.server.bind, "0.0.0.0:1234");
    }

    #[test]
    fn unknown_strategy_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(dir.path(), "reconcile = \"both\"\n");
        let err = load_config_with(Some(path.as_path()), no_env).expect_err("rejected");
        assert_eq!(config_error_code(&err), Some(ErrorCode::ConfigParseError));
    }

    #[test]
    fn invalid_slug_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(dir.path(), "repo = \"not-a-slug\"\n");
        let err = load_config_with(Some(path.as_path()), no_env).expect_err("rejected");
        assert_eq!(config_error_code(&err), Some(ErrorCode::ConfigInvalid));
    }

    #[test]
    fn missing_repo_only_fails_when_needed() {
        let cfg = Config::default();
        let err = cfg.repo_slug().expect_err("no repo");
        assert_eq!(config_error_code(&err), Some(ErrorCode::ConfigInvalid));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_config_with(Some(dir.path().join("absent.toml").as_path()), no_env).is_err());
    }

    #[test]
    fn credentials_require_a_source() {
        let cfg = Config::default();
        let sleeper: Arc<dyn Sleeper> = Arc::new(crate::testing::RecordingSleeper::default());
        let err = cfg.build_credentials(sleeper).expect_err("nothing configured");
        assert_eq!(config_error_code(&err), Some(ErrorCode::ConfigInvalid));
    }

    #[test]
    fn static_token_wins_over_app() {
        let mut cfg = Config::default();
        cfg.github.token = Some("ghp_static".to_string());
        cfg.github.app_id = Some("1".to_string());
        cfg.github.installation_id = Some("2".to_string());
        let sleeper: Arc<dyn Sleeper> = Arc::new(crate::testing::RecordingSleeper::default());

        let cache = cfg.build_credentials(sleeper).expect("static source");
        assert_eq!(cache.token().expect("token"), "ghp_static");
    }

    #[test]
    fn app_credentials_load_private_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key_path = dir.path().join("app.pem");
        std::fs::write(&key_path, include_str!("../tests/fixtures/app-key.pem"))
            .expect("write key");
        let mut cfg = Config::default();
        cfg.github.app_id = Some("1".to_string());
        cfg.github.installation_id = Some("2".to_string());
        cfg.github.private_key_path = key_path;
        let sleeper: Arc<dyn Sleeper> = Arc::new(crate::testing::RecordingSleeper::default());

        assert!(cfg.build_credentials(sleeper).is_ok());
    }
}
