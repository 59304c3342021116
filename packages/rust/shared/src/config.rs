//! Application configuration for Backfeed.
//!
//! User config lives at `~/.backfeed/backfeed.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BackfeedError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "backfeed.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".backfeed";

// ---------------------------------------------------------------------------
// Config structs (matching backfeed.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// The local site whose posts receive mentions.
    #[serde(default)]
    pub site: SiteConfig,

    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Outgoing HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Outbound mention delivery.
    #[serde(default)]
    pub outbound: OutboundConfig,
}

impl AppConfig {
    /// Check values that cannot be expressed by the schema alone.
    pub fn validate(&self) -> Result<()> {
        self.site.origin_url()?;
        if self.outbound.concurrency == 0 {
            return Err(BackfeedError::config("outbound.concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Origin of the local site, e.g. `https://example.com` (no trailing slash).
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Path prefix under which posts are published.
    #[serde(default = "default_post_path")]
    pub post_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            post_path: default_post_path(),
        }
    }
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}
fn default_post_path() -> String {
    "/posts".into()
}

impl SiteConfig {
    /// The configured origin without any trailing slash.
    pub fn origin(&self) -> &str {
        self.origin.trim_end_matches('/')
    }

    /// Parse the origin, rejecting anything that is not an absolute http(s) URL.
    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(self.origin()).map_err(|e| {
            BackfeedError::config(format!("site.origin '{}' is not a URL: {e}", self.origin))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(BackfeedError::config(format!(
                "site.origin '{}' must be an http(s) origin",
                self.origin
            )));
        }
        Ok(url)
    }

    /// Whether `url` begins with the site origin.
    ///
    /// The prefix must end on a boundary, so `https://site.test.evil` is not
    /// owned by `https://site.test`.
    pub fn owns(&self, url: &str) -> bool {
        match url.strip_prefix(self.origin()) {
            Some(rest) => {
                rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('#')
            }
            None => false,
        }
    }

    /// Canonical public URL of the post with `slug`.
    pub fn post_url(&self, slug: &str) -> String {
        let prefix = self.post_path.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{slug}", self.origin())
        } else {
            format!("{}/{prefix}/{slug}", self.origin())
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Route serving the webmention endpoint.
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            endpoint_path: default_endpoint_path(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".into()
}
fn default_endpoint_path() -> String {
    "/webmention".into()
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. A leading `~/` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    format!("~/{CONFIG_DIR_NAME}/backfeed.db")
}

impl DatabaseConfig {
    /// The database path with `~/` expanded.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    BackfeedError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.path)),
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent sent on every outgoing request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for the endpoint discovery HEAD probe.
    #[serde(default = "default_head_timeout")]
    pub discovery_head_timeout_secs: u64,

    /// Timeout for every other request (discovery GET, source fetch, delivery).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Redirects followed before giving up.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Responses announcing a larger `Content-Length` are not read.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            discovery_head_timeout_secs: default_head_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_redirects: default_max_redirects(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("Backfeed/", env!("CARGO_PKG_VERSION"), " (+webmention)").into()
}
fn default_head_timeout() -> u64 {
    5
}
fn default_request_timeout() -> u64 {
    10
}
fn default_max_redirects() -> usize {
    5
}
fn default_max_body_bytes() -> u64 {
    5 * 1024 * 1024
}

impl HttpConfig {
    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_head_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `[outbound]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Send mentions when posts are published or updated.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Candidate URLs considered per post, in encounter order.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Candidates processed at once for a single post.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_candidates: default_max_candidates(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_candidates() -> usize {
    25
}
fn default_concurrency() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.backfeed/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BackfeedError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.backfeed/backfeed.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BackfeedError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        BackfeedError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BackfeedError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BackfeedError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BackfeedError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(origin: &str) -> SiteConfig {
        SiteConfig {
            origin: origin.into(),
            post_path: "/posts".into(),
        }
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("origin"));
        assert!(toml_str.contains("max_candidates = 25"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.http.discovery_head_timeout_secs, 5);
        assert_eq!(parsed.http.request_timeout_secs, 10);
        assert_eq!(parsed.outbound.max_candidates, 25);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[site]
origin = "https://mysite.test/"

[outbound]
concurrency = 8
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.site.origin(), "https://mysite.test");
        assert_eq!(config.site.post_path, "/posts");
        assert_eq!(config.outbound.concurrency, 8);
        assert_eq!(config.outbound.max_candidates, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_origin_rejected() {
        let mut config = AppConfig::default();
        config.site.origin = "not a url".into();
        assert!(config.validate().is_err());

        config.site.origin = "ftp://files.example".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn owns_requires_boundary() {
        let site = site("https://mysite.test");
        assert!(site.owns("https://mysite.test/posts/hello"));
        assert!(site.owns("https://mysite.test"));
        assert!(site.owns("https://mysite.test?p=1"));
        assert!(!site.owns("https://mysite.test.evil.example/posts/hello"));
        assert!(!site.owns("http://mysite.test/posts/hello"));
        assert!(!site.owns("https://other.test/posts/hello"));
    }

    #[test]
    fn post_url_joins_prefix() {
        assert_eq!(
            site("https://mysite.test/").post_url("hello-world"),
            "https://mysite.test/posts/hello-world"
        );

        let bare = SiteConfig {
            origin: "https://mysite.test".into(),
            post_path: "/".into(),
        };
        assert_eq!(bare.post_url("hello"), "https://mysite.test/hello");
    }

    #[test]
    fn database_path_expands_home() {
        let db = DatabaseConfig {
            path: "/var/lib/backfeed.db".into(),
        };
        assert_eq!(db.resolved_path().unwrap(), PathBuf::from("/var/lib/backfeed.db"));

        let db = DatabaseConfig::default();
        let resolved = db.resolved_path().unwrap();
        assert!(resolved.ends_with(".backfeed/backfeed.db"));
    }
}
