use openai_realtime::config::{
    DEFAULT_ENDPOINT, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MODEL, DEFAULT_TRANSCRIPTION_MODEL,
    DEFAULT_VOICE,
};
use openai_realtime::{IdleCapture, RealtimeConfig, VadSettings};
use parley_core::Keywords;
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Invalid config file {}: {reason}", path.display())]
    File { path: PathBuf, reason: String },
}

/// Settings as written in the YAML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    openai_api_key: Option<String>,
    realtime_api_url: Option<String>,
    model_name: Option<String>,
    voice: Option<String>,
    transcription_model: Option<String>,
    transcription_language: Option<String>,
    instructions: Option<String>,
    wake_words: Option<Vec<String>>,
    termination_words: Option<Vec<String>>,
    max_reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    vad_threshold: Option<f32>,
    vad_prefix_padding_ms: Option<u32>,
    vad_silence_duration_ms: Option<u32>,
    idle_capture: Option<String>,
    conversation_log: Option<PathBuf>,
    log_level: Option<String>,
    input_device: Option<String>,
    output_device: Option<String>,
}

/// Holds all configuration loaded at startup.
#[derive(Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub realtime: RealtimeConfig,
    pub conversation_log: PathBuf,
    pub log_level: Level,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Config {
    /// Loads the YAML file at `path`, if present, then applies environment
    /// overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let file = read_file(path)?;
        Self::resolve(file)
    }

    fn resolve(file: FileConfig) -> Result<Self, ConfigError> {
        let api_key = string("OPENAI_API_KEY", file.openai_api_key)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let wake_words = keywords("WAKE_WORDS", file.wake_words)?;
        let termination_words = keywords("TERMINATION_WORDS", file.termination_words)?;

        let vad_defaults = VadSettings::default();
        let vad = VadSettings {
            threshold: parsed("VAD_THRESHOLD", file.vad_threshold)?
                .unwrap_or(vad_defaults.threshold),
            prefix_padding_ms: parsed("VAD_PREFIX_PADDING_MS", file.vad_prefix_padding_ms)?
                .unwrap_or(vad_defaults.prefix_padding_ms),
            silence_duration_ms: parsed("VAD_SILENCE_DURATION_MS", file.vad_silence_duration_ms)?
                .unwrap_or(vad_defaults.silence_duration_ms),
        };
        if !(0.0..=1.0).contains(&vad.threshold) {
            return Err(ConfigError::InvalidValue(
                "VAD_THRESHOLD".to_string(),
                format!("{} is outside 0.0..=1.0", vad.threshold),
            ));
        }

        let idle_capture = match string("IDLE_CAPTURE", file.idle_capture) {
            None => IdleCapture::default(),
            Some(raw) => match raw.to_lowercase().as_str() {
                "transmit" => IdleCapture::Transmit,
                "discard" => IdleCapture::Discard,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "IDLE_CAPTURE".to_string(),
                        format!("'{raw}' is not one of transmit, discard"),
                    ));
                }
            },
        };

        let reconnect_delay_ms = parsed("RECONNECT_DELAY_MS", file.reconnect_delay_ms)?
            .unwrap_or(openai_realtime::config::DEFAULT_RECONNECT_DELAY.as_millis() as u64);

        let realtime = RealtimeConfig {
            endpoint: string("REALTIME_API_URL", file.realtime_api_url)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: string("MODEL_NAME", file.model_name).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: string("VOICE", file.voice).unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            transcription_model: string("TRANSCRIPTION_MODEL", file.transcription_model)
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            transcription_language: string("TRANSCRIPTION_LANGUAGE", file.transcription_language),
            instructions: string("INSTRUCTIONS", file.instructions).unwrap_or_default(),
            vad,
            wake_words,
            termination_words,
            max_reconnect_attempts: parsed("MAX_RECONNECT_ATTEMPTS", file.max_reconnect_attempts)?
                .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            idle_capture,
            ..RealtimeConfig::default()
        };

        let log_level_str = string("RUST_LOG", file.log_level).unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let conversation_log = std::env::var("CONVERSATION_LOG")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or(file.conversation_log)
            .unwrap_or_else(|| PathBuf::from("conversation.txt"));

        Ok(Self {
            api_key: SecretString::from(api_key),
            realtime,
            conversation_log,
            log_level,
            input_device: string("INPUT_DEVICE", file.input_device),
            output_device: string("OUTPUT_DEVICE", file.output_device),
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileConfig::default()),
        Err(e) => {
            return Err(ConfigError::File {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&raw).map_err(|e| ConfigError::File {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// The environment value when set and non-empty, else the file value.
fn string(var: &str, file: Option<String>) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty()).or(file)
}

fn parsed<T>(var: &str, file: Option<T>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(var).ok().filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), format!("'{raw}': {e}"))),
        None => Ok(file),
    }
}

/// A required, non-empty keyword list. The environment form is comma separated.
fn keywords(var: &str, file: Option<Vec<String>>) -> Result<Keywords, ConfigError> {
    let words = match std::env::var(var).ok().filter(|v| !v.is_empty()) {
        Some(raw) => Keywords::new(raw.split(',')),
        None => Keywords::new(file.unwrap_or_default()),
    };
    if words.is_empty() {
        return Err(ConfigError::MissingVar(var.to_string()));
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VARS: &[&str] = &[
        "OPENAI_API_KEY",
        "REALTIME_API_URL",
        "MODEL_NAME",
        "VOICE",
        "TRANSCRIPTION_MODEL",
        "TRANSCRIPTION_LANGUAGE",
        "INSTRUCTIONS",
        "WAKE_WORDS",
        "TERMINATION_WORDS",
        "MAX_RECONNECT_ATTEMPTS",
        "RECONNECT_DELAY_MS",
        "VAD_THRESHOLD",
        "VAD_PREFIX_PADDING_MS",
        "VAD_SILENCE_DURATION_MS",
        "IDLE_CAPTURE",
        "CONVERSATION_LOG",
        "RUST_LOG",
        "INPUT_DEVICE",
        "OUTPUT_DEVICE",
    ];

    fn clear_env_vars() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
            env::set_var("WAKE_WORDS", "Alice");
            env::set_var("TERMINATION_WORDS", "Goodbye, see you");
        }
    }

    fn missing_file() -> PathBuf {
        PathBuf::from("/nonexistent/parley/config.yaml")
    }

    fn yaml(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::load(&missing_file()).expect("Config should load successfully");

        assert_eq!(config.api_key.expose_secret(), "test-openai-key");
        assert_eq!(
            config.realtime.url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-mini-realtime-preview-2024-12-17"
        );
        assert_eq!(config.realtime.voice, "alloy");
        assert_eq!(config.realtime.transcription_model, "whisper-1");
        assert_eq!(config.realtime.transcription_language, None);
        assert_eq!(config.realtime.wake_words.words(), ["alice"]);
        assert_eq!(config.realtime.termination_words.words(), ["goodbye", "see you"]);
        assert_eq!(config.realtime.max_reconnect_attempts, 5);
        assert_eq!(config.realtime.reconnect_delay, Duration::from_millis(2000));
        assert_eq!(config.realtime.vad, VadSettings::default());
        assert_eq!(config.realtime.idle_capture, IdleCapture::Transmit);
        assert_eq!(config.conversation_log, PathBuf::from("conversation.txt"));
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.input_device, None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("REALTIME_API_URL", "ws://localhost:9000/realtime");
            env::set_var("MODEL_NAME", "gpt-4o-realtime-preview");
            env::set_var("VOICE", "verse");
            env::set_var("TRANSCRIPTION_LANGUAGE", "en");
            env::set_var("MAX_RECONNECT_ATTEMPTS", "2");
            env::set_var("RECONNECT_DELAY_MS", "250");
            env::set_var("VAD_THRESHOLD", "0.7");
            env::set_var("IDLE_CAPTURE", "Discard");
            env::set_var("CONVERSATION_LOG", "/tmp/talk.txt");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::load(&missing_file()).expect("Config should load successfully");

        assert_eq!(
            config.realtime.url(),
            "ws://localhost:9000/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(config.realtime.voice, "verse");
        assert_eq!(config.realtime.transcription_language.as_deref(), Some("en"));
        assert_eq!(config.realtime.max_reconnect_attempts, 2);
        assert_eq!(config.realtime.reconnect_delay, Duration::from_millis(250));
        assert!((config.realtime.vad.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.realtime.idle_capture, IdleCapture::Discard);
        assert_eq!(config.conversation_log, PathBuf::from("/tmp/talk.txt"));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_file_with_env_override() {
        clear_env_vars();
        let file = yaml(
            r#"
openai_api_key: file-key
voice: shimmer
wake_words: ["Hey Orin"]
termination_words: ["that's all"]
reconnect_delay_ms: 500
input_device: "USB Mic"
"#,
        );
        unsafe {
            env::set_var("VOICE", "echo");
        }

        let config = Config::load(file.path()).expect("Config should load successfully");

        assert_eq!(config.api_key.expose_secret(), "file-key");
        assert_eq!(config.realtime.voice, "echo");
        assert_eq!(config.realtime.wake_words.words(), ["hey orin"]);
        assert_eq!(config.realtime.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.input_device.as_deref(), Some("USB Mic"));
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();
        unsafe {
            env::set_var("WAKE_WORDS", "Alice");
            env::set_var("TERMINATION_WORDS", "Goodbye");
        }

        let err = Config::load(&missing_file()).unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "OPENAI_API_KEY"),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_blank_wake_words() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("WAKE_WORDS", " , ,");
        }

        let err = Config::load(&missing_file()).unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "WAKE_WORDS"),
            _ => panic!("Expected MissingVar for WAKE_WORDS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers_and_enums() {
        for (var, value) in [
            ("MAX_RECONNECT_ATTEMPTS", "-1"),
            ("RECONNECT_DELAY_MS", "soon"),
            ("VAD_THRESHOLD", "1.5"),
            ("IDLE_CAPTURE", "sometimes"),
            ("RUST_LOG", "not-a-level"),
        ] {
            clear_env_vars();
            set_minimal_env();
            unsafe {
                env::set_var(var, value);
            }

            let err = Config::load(&missing_file()).unwrap_err();
            match err {
                ConfigError::InvalidValue(got, _) => assert_eq!(got, var),
                other => panic!("Expected InvalidValue for {var}, got {other:?}"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_unparsable_file() {
        clear_env_vars();
        set_minimal_env();
        let file = yaml("voice: [unterminated");

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }
}
