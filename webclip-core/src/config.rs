use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Immutable gateway configuration. Loaded once at startup and passed by
/// reference into component constructors; components never read ambient
/// process state themselves.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GatewayConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub browser: BrowserSection,
    #[serde(default)]
    pub recording: RecordingSection,
    #[serde(default)]
    pub transcode: TranscodeSection,
    #[serde(default)]
    pub storage: Option<StorageSection>,
    #[serde(default)]
    pub proxy: ProxySection,
}

impl GatewayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config: GatewayConfig = load_toml(path)?;
        config.apply_env_overrides();
        if config.server.bearer_token.is_empty() {
            return Err(ConfigError::MissingBearerToken);
        }
        Ok(config)
    }

    /// Secrets may live outside the config file. Applied once at load time
    /// so the rest of the process sees only the resolved config.
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("WEBCLIP_BEARER_TOKEN") {
            if !token.is_empty() {
                self.server.bearer_token = token;
            }
        }
        if let Some(storage) = self.storage.as_mut() {
            if let Ok(key) = std::env::var("WEBCLIP_STORAGE_ACCESS_KEY") {
                if !key.is_empty() {
                    storage.access_key = key;
                }
            }
            if let Ok(secret) = std::env::var("WEBCLIP_STORAGE_SECRET_KEY") {
                if !secret.is_empty() {
                    storage.secret_key = secret;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_seconds: u64,
    #[serde(default = "default_browser_tmp_dir")]
    pub tmp_dir: PathBuf,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            sandbox: false,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            navigation_timeout_seconds: default_navigation_timeout(),
            tmp_dir: default_browser_tmp_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSection {
    #[serde(default = "default_viewport_width")]
    pub width: u32,
    #[serde(default = "default_viewport_height")]
    pub height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_recording_duration")]
    pub duration_ms: u64,
    #[serde(default = "default_recording_max_duration")]
    pub max_duration_ms: u64,
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            width: default_viewport_width(),
            height: default_viewport_height(),
            frame_rate: default_frame_rate(),
            duration_ms: default_recording_duration(),
            max_duration_ms: default_recording_max_duration(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeSection {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Falls back to the system temp directory when unset.
    pub tmp_dir: Option<PathBuf>,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
}

impl TranscodeSection {
    pub fn tmp_dir(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for TranscodeSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            tmp_dir: None,
            preset: default_preset(),
            crf: default_crf(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// Host (and optional port) of the S3-compatible endpoint, no scheme.
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxySection {
    /// Base URL of the proxy render service; the render request payload is
    /// appended verbatim.
    pub render_endpoint: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    600
}

fn default_viewport_width() -> u32 {
    1920
}

fn default_viewport_height() -> u32 {
    1080
}

fn default_navigation_timeout() -> u64 {
    240
}

fn default_browser_tmp_dir() -> PathBuf {
    PathBuf::from("/tmp/screencasts")
}

fn default_frame_rate() -> u32 {
    30
}

fn default_recording_duration() -> u64 {
    5000
}

fn default_recording_max_duration() -> u64 {
    60_000
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("/usr/bin/ffmpeg")
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_use_ssl() -> bool {
    true
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [server]
            bearer_token = "secret"
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.request_timeout_seconds, 600);
        assert_eq!(config.browser.viewport_width, 1920);
        assert_eq!(config.browser.viewport_height, 1080);
        assert!(!config.browser.sandbox);
        assert_eq!(config.recording.frame_rate, 30);
        assert_eq!(config.recording.duration_ms, 5000);
        assert_eq!(config.recording.max_duration_ms, 60_000);
        assert_eq!(config.transcode.preset, "veryfast");
        assert_eq!(config.transcode.crf, 23);
        assert!(config.storage.is_none());
        assert!(config.proxy.render_endpoint.is_none());
    }

    #[test]
    fn storage_section_parses() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [server]
            bearer_token = "secret"

            [storage]
            endpoint = "minio.example.com"
            access_key = "ak"
            secret_key = "sk"
            use_ssl = false
            "#,
        )
        .expect("config should parse");
        let storage = config.storage.expect("storage configured");
        assert_eq!(storage.endpoint, "minio.example.com");
        assert_eq!(storage.region, "us-east-1");
        assert!(!storage.use_ssl);
    }

    // Single test because both halves touch WEBCLIP_BEARER_TOKEN and the
    // test binary runs tests in parallel.
    #[test]
    fn bearer_token_is_required_and_env_overridable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("webclip.toml");

        std::fs::write(&path, "[server]\nport = 8080\n").expect("write config");
        let err = GatewayConfig::from_file(&path).expect_err("should fail");
        assert!(matches!(err, ConfigError::MissingBearerToken));

        std::fs::write(&path, "[server]\nbearer_token = \"from-file\"\n").expect("write config");
        std::env::set_var("WEBCLIP_BEARER_TOKEN", "from-env");
        let config = GatewayConfig::from_file(&path).expect("config should load");
        std::env::remove_var("WEBCLIP_BEARER_TOKEN");
        assert_eq!(config.server.bearer_token, "from-env");
    }
}
