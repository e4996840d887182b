//! Persisted settings, read once at startup.
//!
//! ```toml
//! [midi]
//! input_device = "TD-17"
//! output_device = "SP-404"
//!
//! [channels]
//! pads = 9
//!
//! [output_channels]
//! pads = 1
//!
//! [instruments.pads]
//! kind = "auto-release"
//! release_delay_ms = 120
//! ```

use crate::error::{Error, Result};
use crate::instrument::{InstrumentConfig, InstrumentKind, DEFAULT_FALLBACK_RANGE};
use crate::scheduler::ReleaseStyle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_SETTINGS_FILE: &str = "virtuosos.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// Substring of the input port name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

/// Optional per-instrument options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    pub kind: InstrumentKind,

    /// Auto-release default: 100. Floored at 50.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_delay_ms: Option<u64>,

    pub release_style: ReleaseStyle,

    /// Release `fallback_low..=fallback_high` on emergency stop when no note
    /// is tracked.
    pub fallback: bool,
    pub fallback_low: u8,
    pub fallback_high: u8,

    pub enabled: bool,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            kind: InstrumentKind::default(),
            release_delay_ms: None,
            release_style: ReleaseStyle::default(),
            fallback: true,
            fallback_low: *DEFAULT_FALLBACK_RANGE.start(),
            fallback_high: *DEFAULT_FALLBACK_RANGE.end(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub midi: MidiSettings,

    /// Instrument name -> input channel.
    pub channels: BTreeMap<String, u8>,

    /// Instrument name -> output channel. Missing means same as input.
    pub output_channels: BTreeMap<String, u8>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub instruments: BTreeMap<String, InstrumentSettings>,
}

impl Default for Settings {
    /// One auto-release instrument, `pads`, on channel 0.
    fn default() -> Self {
        Self {
            midi: MidiSettings::default(),
            channels: BTreeMap::from([("pads".to_string(), 0)]),
            output_channels: BTreeMap::new(),
            instruments: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Reads `path`, or returns the defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn set_input_device(&mut self, name: impl Into<String>) {
        let name = name.into();
        info!("Updated input_device to: {}", name);
        self.midi.input_device = Some(name);
    }

    pub fn set_output_device(&mut self, name: impl Into<String>) {
        let name = name.into();
        info!("Updated output_device to: {}", name);
        self.midi.output_device = Some(name);
    }

    fn validate(&self) -> Result<()> {
        for (section, map) in [
            ("channels", &self.channels),
            ("output_channels", &self.output_channels),
        ] {
            if let Some((name, channel)) = map.iter().find(|(_, channel)| **channel > 15) {
                return Err(Error::Settings(format!(
                    "[{}] {} = {}: channel must be 0-15",
                    section, name, channel
                )));
            }
        }
        for (name, options) in &self.instruments {
            if options.fallback_low > options.fallback_high || options.fallback_high > 127 {
                return Err(Error::Settings(format!(
                    "[instruments.{}] invalid fallback range {}..={}",
                    name, options.fallback_low, options.fallback_high
                )));
            }
        }
        Ok(())
    }

    /// Instrument configurations in name order.
    pub fn instruments(&self) -> Result<Vec<InstrumentConfig>> {
        self.validate()?;
        for name in self.instruments.keys() {
            if !self.channels.contains_key(name) {
                warn!("[instruments.{}] has no entry in [channels], ignored", name);
            }
        }

        Ok(self
            .channels
            .iter()
            .map(|(name, &input_channel)| {
                let options = self.instruments.get(name).cloned().unwrap_or_default();
                let output_channel = self
                    .output_channels
                    .get(name)
                    .copied()
                    .unwrap_or(input_channel);

                let mut config = InstrumentConfig::new(name.clone(), input_channel)
                    .kind(options.kind)
                    .output_channel(output_channel)
                    .release_style(options.release_style)
                    .enabled(options.enabled);
                if let Some(ms) = options.release_delay_ms {
                    config = config.release_delay(Duration::from_millis(ms));
                }
                if options.fallback {
                    config.fallback(options.fallback_low..=options.fallback_high)
                } else {
                    config.no_fallback()
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let configs = Settings::default().instruments().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name(), "pads");
        assert_eq!(configs[0].input_channel(), 0);
        assert_eq!(configs[0].resolved_output_channel(), 0);
        assert_eq!(configs[0].kind_of(), InstrumentKind::AutoRelease);
    }

    #[test]
    fn test_output_channel_falls_back_to_input() {
        let settings = Settings::from_toml_str(
            r#"
            [channels]
            pads = 9
            keys = 2

            [output_channels]
            pads = 1
            "#,
        )
        .unwrap();

        let configs = settings.instruments().unwrap();
        let names: Vec<&str> = configs.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["keys", "pads"]);
        assert_eq!(configs[0].resolved_output_channel(), 2);
        assert_eq!(configs[1].resolved_output_channel(), 1);
    }

    #[test]
    fn test_instrument_options() {
        let settings = Settings::from_toml_str(
            r#"
            [channels]
            keys = 0

            [instruments.keys]
            kind = "pass-through"
            release_delay_ms = 400
            release_style = "note-off"
            fallback = false
            "#,
        )
        .unwrap();

        let expected = InstrumentConfig::new("keys", 0)
            .kind(InstrumentKind::PassThrough)
            .output_channel(0)
            .release_style(ReleaseStyle::NoteOff)
            .release_delay(Duration::from_millis(400))
            .no_fallback();
        assert_eq!(settings.instruments().unwrap(), vec![expected]);
    }

    #[test]
    fn test_out_of_range_channel_rejected() {
        let err = Settings::from_toml_str("[channels]\npads = 16\n").unwrap_err();
        assert!(matches!(err, Error::Settings(_)));

        let err = Settings::from_toml_str("[output_channels]\npads = 99\n").unwrap_err();
        assert!(matches!(err, Error::Settings(_)));
    }

    #[test]
    fn test_malformed_toml_is_settings_error() {
        let err = Settings::from_toml_str("[channels\npads = 1").unwrap_err();
        assert!(matches!(err, Error::Settings(_)));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_device_choice_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_SETTINGS_FILE);

        let mut settings = Settings::default();
        settings.set_input_device("TD-17");
        settings.set_output_device("SP-404");
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.midi.input_device.as_deref(), Some("TD-17"));
        assert_eq!(loaded.midi.output_device.as_deref(), Some("SP-404"));
        assert_eq!(loaded.channels, settings.channels);
    }
}
