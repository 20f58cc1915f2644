use crate::defaults;
use crate::error::{Result, VaaniError};
use crate::persona::{self, Persona};
use crate::session::manager::SessionOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub live: LiveSettings,
    pub persona: PersonaConfig,
    /// Custom personas, appended to (or replacing) the built-ins
    pub personas: Vec<Persona>,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub outbound_queue: usize,
}

/// Live API connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveSettings {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

/// Persona selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersonaConfig {
    pub default: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            outbound_queue: defaults::OUTBOUND_QUEUE,
        }
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            endpoint: defaults::LIVE_ENDPOINT.to_string(),
            model: defaults::LIVE_MODEL.to_string(),
            api_key_env: defaults::API_KEY_ENV.to_string(),
        }
    }
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default: defaults::DEFAULT_PERSONA.to_string(),
        }
    }
}

fn invalid(key: &str, message: &str) -> VaaniError {
    VaaniError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VAANI_PERSONA → persona.default
    /// - VAANI_MODEL → live.model
    /// - VAANI_INPUT_DEVICE → audio.input_device
    /// - VAANI_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(persona) = std::env::var("VAANI_PERSONA")
            && !persona.is_empty()
        {
            self.persona.default = persona;
        }

        if let Ok(model) = std::env::var("VAANI_MODEL")
            && !model.is_empty()
        {
            self.live.model = model;
        }

        if let Ok(device) = std::env::var("VAANI_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("VAANI_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/vaani/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vaani")
            .join("config.toml")
    }

    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.input_sample_rate == 0 {
            return Err(invalid("audio.input_sample_rate", "must be greater than zero"));
        }
        if self.audio.output_sample_rate == 0 {
            return Err(invalid("audio.output_sample_rate", "must be greater than zero"));
        }
        if self.audio.frame_size == 0 {
            return Err(invalid("audio.frame_size", "must be greater than zero"));
        }
        if self.audio.outbound_queue == 0 {
            return Err(invalid("audio.outbound_queue", "must be greater than zero"));
        }
        if self.live.endpoint.is_empty() {
            return Err(invalid("live.endpoint", "must not be empty"));
        }
        if let Some(custom) = self.personas.iter().find(|p| p.id.trim().is_empty()) {
            return Err(invalid(
                "personas",
                &format!("persona '{}' has an empty id", custom.name),
            ));
        }
        if persona::find(&self.catalog(), &self.persona.default).is_err() {
            return Err(invalid(
                "persona.default",
                &format!("unknown persona '{}'", self.persona.default),
            ));
        }
        Ok(())
    }

    /// Built-in personas merged with the configured ones.
    pub fn catalog(&self) -> Vec<Persona> {
        persona::catalog(&self.personas)
    }

    /// The persona sessions start with unless told otherwise.
    pub fn default_persona(&self) -> Result<Persona> {
        persona::find(&self.catalog(), &self.persona.default)
    }

    /// API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.live.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Settings for new sessions.
    pub fn session_options(&self, api_key: String) -> SessionOptions {
        SessionOptions {
            input_sample_rate: self.audio.input_sample_rate,
            output_sample_rate: self.audio.output_sample_rate,
            frame_size: self.audio.frame_size,
            outbound_queue: self.audio.outbound_queue,
            model: self.live.model.clone(),
            endpoint: self.live.endpoint.clone(),
            api_key,
            ..SessionOptions::default()
        }
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VaaniError::ConfigParse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Voice;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_vaani_env() {
        remove_env("VAANI_PERSONA");
        remove_env("VAANI_MODEL");
        remove_env("VAANI_INPUT_DEVICE");
        remove_env("VAANI_OUTPUT_DEVICE");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.output_device, None);
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.output_sample_rate, 24000);
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.audio.outbound_queue, 32);

        assert_eq!(config.live.api_key_env, "GEMINI_API_KEY");
        assert!(config.live.endpoint.starts_with("wss://"));

        assert_eq!(config.persona.default, "ancient-guru");
        assert!(config.personas.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [audio]
            input_device = "pipewire"
            output_device = "pulse"
            frame_size = 2048
            outbound_queue = 8

            [live]
            model = "models/other"
            api_key_env = "MY_KEY"

            [persona]
            default = "tutor"

            [[personas]]
            id = "tutor"
            name = "Sanskrit Tutor"
            voice = "Kore"
            system_instruction = "Teach Sanskrit patiently."
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, Some("pipewire".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.audio.outbound_queue, 8);
        assert_eq!(config.live.model, "models/other");
        assert_eq!(config.live.api_key_env, "MY_KEY");
        assert!(config.validate().is_ok());

        let persona = config.default_persona().unwrap();
        assert_eq!(persona.name, "Sanskrit Tutor");
        assert_eq!(persona.voice, Voice::Kore);
        assert_eq!(config.catalog().len(), 6);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [live]
            model = "models/small"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.live.model, "models/small");
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.persona, PersonaConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.audio.frame_size = 0;
        match config.validate() {
            Err(VaaniError::ConfigInvalidValue { key, .. }) => assert_eq!(key, "audio.frame_size"),
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }

        let mut config = Config::default();
        config.audio.output_sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.outbound_queue = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_default_persona() {
        let mut config = Config::default();
        config.persona.default = "nobody".to_string();
        match config.validate() {
            Err(VaaniError::ConfigInvalidValue { key, message }) => {
                assert_eq!(key, "persona.default");
                assert!(message.contains("nobody"));
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_env_override_persona_and_model() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_vaani_env();

        set_env("VAANI_PERSONA", "vedic-seer");
        set_env("VAANI_MODEL", "models/override");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.persona.default, "vedic-seer");
        assert_eq!(config.live.model, "models/override");
        assert_eq!(config.audio.input_device, None);

        clear_vaani_env();
    }

    #[test]
    fn test_env_override_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_vaani_env();

        set_env("VAANI_INPUT_DEVICE", "hw:1,0");
        set_env("VAANI_OUTPUT_DEVICE", "pulse");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));

        clear_vaani_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_vaani_env();

        set_env("VAANI_PERSONA", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.persona.default, "ancient-guru");

        clear_vaani_env();
    }

    #[test]
    fn test_api_key_reads_configured_variable() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        config.live.api_key_env = "VAANI_TEST_API_KEY".to_string();

        remove_env("VAANI_TEST_API_KEY");
        assert_eq!(config.api_key(), None);

        set_env("VAANI_TEST_API_KEY", "secret");
        assert_eq!(config.api_key(), Some("secret".to_string()));

        set_env("VAANI_TEST_API_KEY", "  ");
        assert_eq!(config.api_key(), None);

        remove_env("VAANI_TEST_API_KEY");
    }

    #[test]
    fn test_session_options_follow_config() {
        let mut config = Config::default();
        config.audio.frame_size = 1024;
        config.live.model = "models/x".to_string();

        let options = config.session_options("key".to_string());

        assert_eq!(options.frame_size, 1024);
        assert_eq!(options.model, "models/x");
        assert_eq!(options.api_key, "key");
        assert_eq!(options.decode_concurrency, defaults::DECODE_CONCURRENCY);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp(
            r#"
            [audio
            input_device = "broken
        "#,
        );

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("vaani"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_vaani_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = Config::default();
        config.audio.input_device = Some("pipewire".to_string());
        config.personas = vec![persona::builtin().remove(0)];

        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed, config);
    }
}
