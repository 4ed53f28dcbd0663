//! Reads/writes `~/.sensordash/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sensordash_perception::BoxDims;
use sensordash_runtime::SchedulerConfig;
use sensordash_types::SensorError;
use serde::{Deserialize, Serialize};

/// Persisted settings for `serve` and `poll`.  Every field has a default, so
/// a partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP port of the dashboard and ingestion endpoint.
    pub http_port: u16,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// How long a client may take to send one request.
    pub request_timeout_ms: u64,

    pub refresh_interval_ms: u64,
    /// Samples fetched per refresh.
    pub window_size: usize,
    pub query_timeout_ms: u64,

    /// Half-extents of the rendered phone box.
    pub box_half_width: f64,
    pub box_half_height: f64,
    pub box_half_depth: f64,

    /// User tag attached to polled samples.
    pub user_id: String,
    /// Base URL of the phyphox app's remote-access server.
    pub phyphox_url: String,
    /// Where the poller posts samples.
    pub ingest_url: String,
}

impl Default for Config {
    fn default() -> Self {
        let dims = BoxDims::default();
        Self {
            http_port: sensordash_cockpit::DEFAULT_PORT,
            db_path: config_dir_for_home(&home_dir()).join("samples.db"),
            request_timeout_ms: sensordash_cockpit::DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            refresh_interval_ms: 1_000,
            window_size: 100,
            query_timeout_ms: 3_000,
            box_half_width: dims.half_width,
            box_half_height: dims.half_height,
            box_half_depth: dims.half_depth,
            user_id: String::new(),
            phyphox_url: "http://192.168.0.108".to_string(),
            ingest_url: format!(
                "http://localhost:{}/api/sensor_ingest",
                sensordash_cockpit::DEFAULT_PORT
            ),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_millis(self.refresh_interval_ms.max(1)),
            window_size: self.window_size,
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            box_dims: BoxDims {
                half_width: self.box_half_width,
                half_height: self.box_half_height,
                half_depth: self.box_half_depth,
            },
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn config_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sensordash")
}

/// Return the path to `~/.sensordash/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    config_dir_for_home(home).join("config.toml")
}

/// Load the config from disk, falling back to defaults when the file does
/// not exist, then apply `SENSORDASH_*` overrides.
pub fn load() -> Result<Config, SensorError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, SensorError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        SensorError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| SensorError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `SENSORDASH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SENSORDASH_HTTP_PORT` | `http_port` |
/// | `SENSORDASH_DB_PATH` | `db_path` |
/// | `SENSORDASH_REQUEST_TIMEOUT_MS` | `request_timeout_ms` |
/// | `SENSORDASH_REFRESH_INTERVAL_MS` | `refresh_interval_ms` |
/// | `SENSORDASH_WINDOW_SIZE` | `window_size` |
/// | `SENSORDASH_QUERY_TIMEOUT_MS` | `query_timeout_ms` |
/// | `SENSORDASH_USER` | `user_id` |
/// | `SENSORDASH_PHYPHOX_URL` | `phyphox_url` |
/// | `SENSORDASH_INGEST_URL` | `ingest_url` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
        lookup(name)?.trim().parse().ok()
    }

    if let Some(port) = parsed(&lookup, "SENSORDASH_HTTP_PORT") {
        cfg.http_port = port;
    }
    if let Some(path) = lookup("SENSORDASH_DB_PATH") {
        cfg.db_path = PathBuf::from(path);
    }
    if let Some(ms) = parsed(&lookup, "SENSORDASH_REQUEST_TIMEOUT_MS") {
        cfg.request_timeout_ms = ms;
    }
    if let Some(ms) = parsed(&lookup, "SENSORDASH_REFRESH_INTERVAL_MS") {
        cfg.refresh_interval_ms = ms;
    }
    if let Some(n) = parsed(&lookup, "SENSORDASH_WINDOW_SIZE") {
        cfg.window_size = n;
    }
    if let Some(ms) = parsed(&lookup, "SENSORDASH_QUERY_TIMEOUT_MS") {
        cfg.query_timeout_ms = ms;
    }
    if let Some(user) = lookup("SENSORDASH_USER") {
        cfg.user_id = user;
    }
    if let Some(url) = lookup("SENSORDASH_PHYPHOX_URL") {
        cfg.phyphox_url = url;
    }
    if let Some(url) = lookup("SENSORDASH_INGEST_URL") {
        cfg.ingest_url = url;
    }
}

/// Save the config to disk, creating `~/.sensordash/` if necessary.
pub fn save(cfg: &Config) -> Result<(), SensorError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), SensorError> {
    let io_err = |what: &str, e: std::io::Error| SensorError::Config(format!("{what}: {e}"));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to set config directory permissions", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| SensorError::Config(format!("failed to serialize config: {e}")))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err(&format!("failed to write config at {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| io_err(&format!("failed to write config at {}", path.display()), e))?;
    Ok(())
}
