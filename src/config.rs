use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    audio::player::RepeatMode,
    error::{AutomixError, Result},
    scheduler::timeline::FadeConvention,
    stream::encoder::Codec,
};

// ── MixConfig ───────────────────────────────────────────────────────────────

/// Trim window applied to every track plus the overlap between neighbours.
///
/// All values are seconds. The segment heard from each track is
/// `[start_trim, end_point)` of its native audio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub start_trim: f64,
    pub end_point: f64,
    pub crossfade_duration: f64,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            start_trim: 0.0,
            end_point: 180.0,
            crossfade_duration: 5.0,
        }
    }
}

impl MixConfig {
    pub fn new(start_trim: f64, end_point: f64, crossfade_duration: f64) -> Self {
        Self {
            start_trim,
            end_point,
            crossfade_duration,
        }
    }

    /// Seconds actually heard from each track.
    pub fn segment_duration(&self) -> f64 {
        self.end_point - self.start_trim
    }

    /// Every violated constraint, in a stable order. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(self.start_trim >= 0.0) {
            errors.push(format!("start trim must be >= 0 (got {})", self.start_trim));
        }
        if !(self.end_point > self.start_trim) {
            errors.push(format!(
                "end point must be greater than start trim (got {} <= {})",
                self.end_point, self.start_trim
            ));
        }
        if !(self.crossfade_duration >= 0.0) {
            errors.push(format!(
                "crossfade duration must be >= 0 (got {})",
                self.crossfade_duration
            ));
        }
        if self.crossfade_duration > self.segment_duration() {
            errors.push(format!(
                "crossfade duration ({}) cannot exceed the segment duration ({})",
                self.crossfade_duration,
                self.segment_duration()
            ));
        }

        errors
    }

    /// `validate()` folded into a single `InvalidConfig` error.
    pub fn check(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AutomixError::InvalidConfig(errors.join("; ")))
        }
    }
}

// ── EngineSettings ──────────────────────────────────────────────────────────

/// Host-level settings, persisted as a JSON document.
///
/// Every field has a default so a partial document is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Output rate of rendered mixes (Hz).
    pub sample_rate: u32,
    pub fade_convention: FadeConvention,
    pub preferred_codec: Codec,
    /// Bitrate handed to the lossy encoder (kbps).
    pub bitrate_kbps: u32,
    /// Player output volume, 0.0 – 1.0.
    pub volume: f32,
    pub repeat_mode: RepeatMode,
    pub mix: MixConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            fade_convention: FadeConvention::default(),
            preferred_codec: Codec::Mp3,
            bitrate_kbps: 192,
            volume: 1.0,
            repeat_mode: RepeatMode::Off,
            mix: MixConfig::default(),
        }
    }
}

impl EngineSettings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| AutomixError::Settings(format!("parse error: {e}")))?;
        if settings.sample_rate == 0 {
            return Err(AutomixError::Settings("sample_rate must be > 0".into()));
        }
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AutomixError::Settings(format!("serialize error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mix_config_is_valid() {
        let cfg = MixConfig::default();
        assert!(cfg.validate().is_empty());
        assert!((cfg.segment_duration() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn validate_collects_every_violation() {
        let cfg = MixConfig::new(-1.0, -2.0, -3.0);
        let errors = cfg.validate();
        assert_eq!(errors.len(), 3, "got {errors:?}");
    }

    #[test]
    fn crossfade_longer_than_segment_is_rejected() {
        let cfg = MixConfig::new(10.0, 20.0, 10.5);
        assert!(matches!(cfg.check(), Err(AutomixError::InvalidConfig(_))));

        // Equal is the maximum legal overlap.
        let cfg = MixConfig::new(10.0, 20.0, 10.0);
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn nan_values_are_rejected() {
        let cfg = MixConfig::new(f64::NAN, 20.0, 1.0);
        assert!(cfg.check().is_err());
        let cfg = MixConfig::new(0.0, 20.0, f64::NAN);
        assert!(cfg.check().is_err());
    }

    #[test]
    fn partial_settings_document_uses_defaults() {
        let settings =
            EngineSettings::from_json(r#"{ "sample_rate": 48000, "fade_convention": "centered" }"#)
                .unwrap();
        assert_eq!(settings.sample_rate, 48000);
        assert_eq!(settings.fade_convention, FadeConvention::Centered);
        assert_eq!(settings.preferred_codec, Codec::Mp3);
        assert_eq!(settings.mix, MixConfig::default());
    }

    #[test]
    fn settings_round_trip_through_json() {
        let mut settings = EngineSettings::default();
        settings.repeat_mode = RepeatMode::All;
        settings.mix.crossfade_duration = 2.5;
        let json = settings.to_json().unwrap();
        assert_eq!(EngineSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn malformed_settings_report_settings_error() {
        let err = EngineSettings::from_json("{ not json").unwrap_err();
        assert!(matches!(err, AutomixError::Settings(_)));
        let err = EngineSettings::from_json(r#"{ "sample_rate": 0 }"#).unwrap_err();
        assert!(matches!(err, AutomixError::Settings(_)));
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let path = std::env::temp_dir().join("automix-settings-that-does-not-exist.json");
        let settings = EngineSettings::load(&path).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }
}
