use detection_store::StoreConfig;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub storage: Option<StoreConfig>,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

pub trait Validatable {
    fn get_path(&self) -> PathBuf;
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    #[default]
    Nhwc,
    Nchw,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub model_file: String,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default)]
    pub input_layout: InputLayout,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_output_size_per_class: usize,
    #[serde(default = "default_max_detections")]
    pub max_total_size: usize,
    #[serde(default)]
    pub box_output: Option<String>,
    #[serde(default)]
    pub score_output: Option<String>,
    #[serde(default)]
    pub intra_threads: Option<usize>,
}

fn default_input_size() -> u32 {
    416
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_score_threshold() -> f32 {
    0.25
}

fn default_max_detections() -> usize {
    50
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        if self.input_size == 0 {
            return Err("Model input size must be greater than zero".to_string());
        }
        for (name, value) in [
            ("iou_threshold", self.iou_threshold),
            ("score_threshold", self.score_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.max_output_size_per_class == 0 || self.max_total_size == 0 {
            return Err("Detection limits must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_dir: PathBuf,
    pub labels_file: String,
}

impl Validatable for LabelsConfig {
    fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Labels file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub font_path: Option<PathBuf>,
}

fn default_queue_capacity() -> usize {
    16
}

fn default_jpeg_quality() -> u8 {
    90
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_capacity: default_queue_capacity(),
            jpeg_quality: default_jpeg_quality(),
            font_path: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.model.validate()?;
        self.labels.validate()?;
        if self.artifacts.enabled {
            if self.storage.is_none() {
                return Err("Artifact upload is enabled but no storage is configured".to_string());
            }
            if self.artifacts.queue_capacity == 0 {
                return Err("Artifact queue capacity must be greater than zero".to_string());
            }
            if !(1..=100).contains(&self.artifacts.jpeg_quality) {
                return Err(format!(
                    "JPEG quality must be within [1, 100], got {}",
                    self.artifacts.jpeg_quality
                ));
            }
        }
        Ok(())
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

#[derive(Debug, Deserialize, Clone)]
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
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

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
            config::Environment::with_prefix("SCORING")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = config.try_deserialize::<Config>()?;
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn model_config(model_dir: PathBuf) -> ModelConfig {
        ModelConfig {
            model_dir,
            model_file: "yolov4-tiny.onnx".to_string(),
            input_size: default_input_size(),
            input_layout: InputLayout::Nhwc,
            iou_threshold: default_iou_threshold(),
            score_threshold: default_score_threshold(),
            max_output_size_per_class: 50,
            max_total_size: 50,
            box_output: None,
            score_output: None,
            intra_threads: None,
        }
    }

    #[test]
    fn test_model_validation() {
        let dir = tempdir().unwrap();
        let mut model = model_config(dir.path().to_path_buf());
        assert!(model.validate().is_err());

        fs::write(dir.path().join("yolov4-tiny.onnx"), b"onnx").unwrap();
        assert!(model.validate().is_ok());

        model.score_threshold = 1.5;
        assert!(model.validate().unwrap_err().contains("score_threshold"));
    }

    #[test]
    fn test_log_level_parse() {
        assert!(matches!(LogLevel::try_from("DEBUG".to_string()), Ok(LogLevel::Debug)));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }

    #[test]
    fn test_artifacts_require_storage() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("yolov4-tiny.onnx"), b"onnx").unwrap();
        fs::write(dir.path().join("coco.names"), b"person\n").unwrap();

        let mut config = Config {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            log_level: LogLevel::Info,
            model: model_config(dir.path().to_path_buf()),
            labels: LabelsConfig {
                labels_dir: dir.path().to_path_buf(),
                labels_file: "coco.names".to_string(),
            },
            artifacts: ArtifactsConfig {
                enabled: true,
                ..ArtifactsConfig::default()
            },
            storage: None,
        };
        assert!(config.validate().is_err());

        config.storage = Some(StoreConfig::Local {
            root: dir.path().join("frames"),
        });
        assert!(config.validate().is_ok());
    }
}
