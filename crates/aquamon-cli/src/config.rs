//! Configuration vault: reads and writes `~/.aquamon/config.toml`.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use aquamon_alerts::AlertConfig;
use aquamon_ingest::{IngestConfig, PushEvents};
use aquamon_types::{AquaError, Lifecycle};
use serde::{Deserialize, Serialize};

/// Persisted host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub push: PushSection,
    #[serde(default)]
    pub surface: SurfaceSection,
    #[serde(default)]
    pub host: HostSection,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub ingest: IngestSection,
}

/// REST pull API.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Bearer token. Stored as plain text; the vault file is owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ApiSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSection")
            .field("base_url", &self.base_url)
            .field(
                "token",
                if self.token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("page_limit", &self.page_limit)
            .field("max_pages", &self.max_pages)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            token: String::new(),
            page_limit: default_page_limit(),
            max_pages: default_max_pages(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ApiSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token(&self) -> Option<String> {
        (!self.token.is_empty()).then(|| self.token.clone())
    }
}

/// WebSocket push stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSection {
    #[serde(default = "default_push_url")]
    pub url: String,

    #[serde(default = "default_reading_event")]
    pub reading_event: String,

    #[serde(default = "default_locations_event")]
    pub locations_event: String,
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            url: default_push_url(),
            reading_event: default_reading_event(),
            locations_event: default_locations_event(),
        }
    }
}

impl PushSection {
    pub fn events(&self) -> PushEvents {
        PushEvents {
            reading: self.reading_event.clone(),
            locations_changed: self.locations_event.clone(),
        }
    }
}

/// Rendering surface endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceSection {
    #[serde(default = "default_surface_bind")]
    pub bind: IpAddr,

    #[serde(default = "default_surface_port")]
    pub port: u16,
}

impl Default for SurfaceSection {
    fn default() -> Self {
        Self {
            bind: default_surface_bind(),
            port: default_surface_port(),
        }
    }
}

impl SurfaceSection {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Host application state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSection {
    /// Lifecycle the host starts in. A headless host has no foreground UI,
    /// so it defaults to `background` and notifications reach the gateway.
    #[serde(default = "default_lifecycle")]
    pub lifecycle: Lifecycle,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            lifecycle: default_lifecycle(),
        }
    }
}

/// Telemetry ingestion tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            location_id: None,
            dedup_capacity: default_dedup_capacity(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Config {
    /// Ingestor settings assembled from the `api` and `ingest` sections.
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            location_id: self.ingest.location_id.clone(),
            page_limit: self.api.page_limit,
            max_pages: self.api.max_pages,
            backoff_base: Duration::from_secs(self.ingest.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.ingest.backoff_cap_secs),
            max_reconnect_attempts: self.ingest.max_reconnect_attempts,
            dedup_capacity: self.ingest.dedup_capacity,
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_page_limit() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_push_url() -> String {
    "ws://localhost:3000/ws".to_string()
}
fn default_reading_event() -> String {
    aquamon_ingest::push::DEFAULT_READING_EVENT.to_string()
}
fn default_locations_event() -> String {
    aquamon_ingest::push::DEFAULT_LOCATIONS_EVENT.to_string()
}
fn default_surface_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_surface_port() -> u16 {
    9090
}
fn default_lifecycle() -> Lifecycle {
    Lifecycle::Background
}
fn default_dedup_capacity() -> usize {
    aquamon_ingest::dedup::DEFAULT_DEDUP_CAPACITY
}
fn default_backoff_base_secs() -> u64 {
    2
}
fn default_backoff_cap_secs() -> u64 {
    30
}
fn default_max_reconnect_attempts() -> u32 {
    5
}

/// Return the path to `~/.aquamon/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".aquamon").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, AquaError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, AquaError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        AquaError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| AquaError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `AQUAMON_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `AQUAMON_API_URL` | `api.base_url` |
/// | `AQUAMON_API_TOKEN` | `api.token` |
/// | `AQUAMON_PUSH_URL` | `push.url` |
/// | `AQUAMON_SURFACE_PORT` | `surface.port` |
/// | `AQUAMON_LOCATION_ID` | `ingest.location_id` |
/// | `AQUAMON_LIFECYCLE` | `host.lifecycle` (`foreground` / `background`) |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("AQUAMON_API_URL") {
        cfg.api.base_url = v;
    }
    if let Ok(v) = std::env::var("AQUAMON_API_TOKEN") {
        cfg.api.token = v;
    }
    if let Ok(v) = std::env::var("AQUAMON_PUSH_URL") {
        cfg.push.url = v;
    }
    if let Ok(v) = std::env::var("AQUAMON_SURFACE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.surface.port = port;
    }
    if let Ok(v) = std::env::var("AQUAMON_LOCATION_ID") {
        let v = v.trim();
        cfg.ingest.location_id = (!v.is_empty()).then(|| v.to_string());
    }
    if let Ok(v) = std::env::var("AQUAMON_LIFECYCLE")
        && let Some(lifecycle) = parse_lifecycle(&v)
    {
        cfg.host.lifecycle = lifecycle;
    }
}

pub fn parse_lifecycle(s: &str) -> Option<Lifecycle> {
    match s.trim().to_ascii_lowercase().as_str() {
        "foreground" | "fg" => Some(Lifecycle::Foreground),
        "background" | "bg" => Some(Lifecycle::Background),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.aquamon/` if necessary.
pub fn save(cfg: &Config) -> Result<(), AquaError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), AquaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AquaError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                AquaError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| AquaError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| AquaError::Config(format!("failed to write config at {}: {e}", path.display()));
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
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_the_token() {
        let mut cfg = Config::default();
        cfg.api.token = "tok-super-secret".to_string();
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("tok-super-secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn debug_shows_not_set_for_empty_token() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_keeps_every_section() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.api.page_limit = 25;
        cfg.push.reading_event = "reading".into();
        cfg.alerts.turbidity_above = 60.0;
        cfg.ingest.backoff_cap_secs = 45;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.api.page_limit, 25);
        assert_eq!(loaded.push.reading_event, "reading");
        assert_eq!(loaded.alerts.turbidity_above, 60.0);
        assert_eq!(loaded.ingest.backoff_cap_secs, 45);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[surface]\nport = 7000\n\n[alerts]\nph_acid_below = 6.5\n").unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.surface.port, 7000);
        assert_eq!(cfg.alerts.ph_acid_below, 6.5);
        assert_eq!(cfg.alerts.ph_base_above, 9.0);
        assert_eq!(cfg.api.max_pages, 100);
        assert_eq!(cfg.push.locations_event, "location-changed");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[surface\nport = ").unwrap();
        assert!(matches!(load_from(&path), Err(AquaError::Config(_))));
    }

    #[test]
    fn config_path_points_to_aquamon_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".aquamon"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn ingest_config_maps_sections() {
        let mut cfg = Config::default();
        cfg.api.page_limit = 50;
        cfg.ingest.location_id = Some("7".into());
        cfg.ingest.backoff_base_secs = 3;
        let ic = cfg.ingest_config();
        assert_eq!(ic.page_limit, 50);
        assert_eq!(ic.location_id.as_deref(), Some("7"));
        assert_eq!(ic.backoff_base, Duration::from_secs(3));
        assert_eq!(ic.backoff_cap, Duration::from_secs(30));
        assert_eq!(ic.max_reconnect_attempts, 5);
    }

    #[test]
    fn lifecycle_parsing() {
        assert_eq!(parse_lifecycle("Foreground"), Some(Lifecycle::Foreground));
        assert_eq!(parse_lifecycle(" bg "), Some(Lifecycle::Background));
        assert_eq!(parse_lifecycle("minimised"), None);
    }

    #[test]
    fn apply_env_overrides_changes_api_url() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("AQUAMON_API_URL", "http://sensors.local:8080") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.api.base_url, "http://sensors.local:8080");
        unsafe { std::env::remove_var("AQUAMON_API_URL") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("AQUAMON_SURFACE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.surface.port, 9090);
        unsafe { std::env::remove_var("AQUAMON_SURFACE_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_lifecycle_and_location() {
        // SAFETY: no other test reads these variables.
        unsafe {
            std::env::set_var("AQUAMON_LIFECYCLE", "foreground");
            std::env::set_var("AQUAMON_LOCATION_ID", "12");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.host.lifecycle, Lifecycle::Foreground);
        assert_eq!(cfg.ingest.location_id.as_deref(), Some("12"));
        unsafe {
            std::env::remove_var("AQUAMON_LIFECYCLE");
            std::env::remove_var("AQUAMON_LOCATION_ID");
        }
    }
}
