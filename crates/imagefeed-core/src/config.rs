use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.unsplash.com";
pub const DEFAULT_OAUTH_BASE: &str = "https://unsplash.com";
pub const DEFAULT_REDIRECT_URI: &str = "imagefeed://auth";
pub const DEFAULT_SCOPES: &[&str; 3] = &["public", "read_user", "write_likes"];

/// Locates the per-user configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("app", "imagefeed", "imagefeed")
            .ok_or(ConfigError::MissingProjectDirs)?;
        let config_dir = dirs.config_dir();
        fs::create_dir_all(config_dir).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(config_dir)?;
        Ok(Self {
            root: config_dir.to_path_buf(),
        })
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Path to the token file for the given profile.
    pub fn credentials_file(&self, profile: &str) -> PathBuf {
        self.root.join(format!("credentials-{profile}.json"))
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Unsplash application credentials and endpoints.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub api_base: Url,
    pub oauth_base: Url,
}

impl ApiConfig {
    pub fn new<I, S>(client_id: I, client_secret: S) -> Self
    where
        I: Into<String>,
        S: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_owned(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            api_base: Url::parse(DEFAULT_API_BASE).expect("valid default API base"),
            oauth_base: Url::parse(DEFAULT_OAUTH_BASE).expect("valid default OAuth base"),
        }
    }

    /// Build a configuration from `IMAGEFEED_*` environment variables.
    ///
    /// Missing keys are left empty; requests that need them fail when they are built.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new(
            non_empty_var("IMAGEFEED_ACCESS_KEY").unwrap_or_default(),
            non_empty_var("IMAGEFEED_SECRET_KEY").unwrap_or_default(),
        );

        if let Some(redirect) = non_empty_var("IMAGEFEED_REDIRECT_URI") {
            config.redirect_uri = redirect;
        }

        if let Some(scopes) = non_empty_var("IMAGEFEED_SCOPES") {
            config = config.with_scopes(scopes.split(|c: char| c == '+' || c.is_whitespace()));
        }

        if let Some(base) = non_empty_var("IMAGEFEED_API_BASE") {
            config.api_base = Url::parse(&base).map_err(|source| ConfigError::InvalidUrl {
                var: "IMAGEFEED_API_BASE",
                source,
            })?;
        }

        if let Some(base) = non_empty_var("IMAGEFEED_OAUTH_BASE") {
            config.oauth_base = Url::parse(&base).map_err(|source| ConfigError::InvalidUrl {
                var: "IMAGEFEED_OAUTH_BASE",
                source,
            })?;
        }

        Ok(config)
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes
            .into_iter()
            .map(Into::into)
            .filter(|scope: &String| !scope.is_empty())
            .collect();
        self
    }

    pub fn with_api_base(mut self, base: Url) -> Self {
        self.api_base = base;
        self
    }

    pub fn with_oauth_base(mut self, base: Url) -> Self {
        self.oauth_base = base;
        self
    }

    /// Append `segments` to the API base URL, percent-encoding each one.
    pub fn api_url(&self, segments: &[&str]) -> Url {
        join_segments(&self.api_base, segments)
    }

    pub fn oauth_url(&self, segments: &[&str]) -> Url {
        join_segments(&self.oauth_base, segments)
    }
}

fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Errors that can occur when working with configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for imagefeed")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid URL in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
