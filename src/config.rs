use serde::Deserialize;
use std::{path::Path, time::Duration};

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    #[default]
    Gemini,
    /// Canned replies, no network. Useful for demos without a key.
    Offline,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    #[serde(default)]
    pub backend: ModelBackend,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_resize_width")]
    pub resize_width: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_model() -> String {
    "gemini-robotics-er-1.5-preview".into()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_min_interval_ms() -> u64 {
    4500
}

fn default_resize_width() -> u32 {
    800
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::default(),
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            temperature: default_temperature(),
            min_interval_ms: default_min_interval_ms(),
            resize_width: default_resize_width(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl InferenceConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Configured key first, then the `GOOGLE_API_KEY` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        let present = |key: &String| !key.trim().is_empty();
        self.api_key
            .clone()
            .filter(present)
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(present))
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    #[default]
    Synthetic,
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub source: SourceKind,
    #[serde(default)]
    pub device: i32,
    #[serde(default = "default_frame_width")]
    pub width: u32,
    #[serde(default = "default_frame_height")]
    pub height: u32,
    #[serde(default)]
    pub max_frames: Option<u64>,
}

fn default_frame_width() -> u32 {
    1280
}

fn default_frame_height() -> u32 {
    720
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            device: 0,
            width: default_frame_width(),
            height: default_frame_height(),
            max_frames: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenterKind {
    Window,
    #[default]
    Console,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RenderConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default)]
    pub presenter: PresenterKind,
}

fn default_tick_ms() -> u64 {
    30
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            presenter: PresenterKind::default(),
        }
    }
}

impl RenderConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(&base_path.join("configuration"), environment)
}

/// Layers `base.yaml`, then `{environment}.yaml` if present, then `SO_*`
/// environment variables, all read from `configuration_directory`.
pub fn load_configuration(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("SO")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_yaml(yaml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Config>()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = from_yaml("log_level: info").unwrap();

        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.server.enabled);
        assert_eq!(config.inference.backend, ModelBackend::Gemini);
        assert_eq!(config.inference.model, "gemini-robotics-er-1.5-preview");
        assert_eq!(config.inference.min_interval(), Duration::from_millis(4500));
        assert_eq!(config.inference.resize_width, 800);
        assert!((config.inference.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.camera.source, SourceKind::Synthetic);
        assert_eq!(config.render.presenter, PresenterKind::Console);
        assert_eq!((config.camera.width, config.camera.height), (1280, 720));
        assert_eq!(config.render.tick(), Duration::from_millis(30));
    }

    #[test]
    fn test_sections_override_defaults() {
        let yaml = r#"
log_level: DEBUG
server:
  enabled: true
  port: 9000
inference:
  backend: offline
  min_interval_ms: 1000
camera:
  source: camera
  max_frames: 25
render:
  presenter: window
  tick_ms: 0
"#;
        let config = from_yaml(yaml).unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.server.get_address(), "127.0.0.1:9000");
        assert_eq!(config.inference.backend, ModelBackend::Offline);
        assert_eq!(config.inference.min_interval(), Duration::from_secs(1));
        assert_eq!(config.camera.source, SourceKind::Camera);
        assert_eq!(config.camera.max_frames, Some(25));
        assert_eq!(config.render.presenter, PresenterKind::Window);
        assert!(config.render.tick().is_zero());
    }

    #[test]
    fn test_shipped_files_layer_over_base() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("configuration");

        let local = load_configuration(&dir, Environment::Local).unwrap();
        assert_eq!(local.log_level, LogLevel::Debug);
        assert_eq!(local.inference.backend, ModelBackend::Offline);
        assert_eq!(local.camera.source, SourceKind::Synthetic);
        assert_eq!(local.render.presenter, PresenterKind::Console);

        let production = load_configuration(&dir, Environment::Production).unwrap();
        assert_eq!(production.log_level, LogLevel::Info);
        assert_eq!(production.inference.backend, ModelBackend::Gemini);
        assert_eq!(production.camera.source, SourceKind::Camera);
        assert_eq!(production.render.presenter, PresenterKind::Window);
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        assert!(from_yaml("log_level: trace").is_err());
        assert!(LogLevel::try_from("Info".to_string()).is_ok());
    }

    #[test]
    fn test_configured_api_key_wins() {
        let config = InferenceConfig {
            api_key: Some("from-config".into()),
            ..InferenceConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("from-config"));
    }
}
