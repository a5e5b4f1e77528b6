//! Pipeline configuration.

use crate::audio;
use crate::error::VoiceError;
use std::time::Duration;

/// Tunables for the voice pipeline. `Default` matches the production
/// deployment; `from_env` lets operators override individual values.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Rate the uplink resamples to before sending (Hz).
    pub target_sample_rate: u32,
    /// Rate of the synthesized speech the service returns (Hz).
    pub playback_sample_rate: u32,
    /// Samples per capture frame at the device's native rate.
    pub capture_block_size: usize,
    /// Lead added before the first chunk scheduled after an idle period,
    /// to avoid an audible click. Empirical, not an invariant.
    pub playback_lead: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: audio::SERVICE_INPUT_SAMPLE_RATE,
            playback_sample_rate: audio::SERVICE_OUTPUT_SAMPLE_RATE,
            capture_block_size: 4096,
            playback_lead: Duration::from_millis(50),
        }
    }
}

impl VoiceConfig {
    /// Loads defaults, then applies `ARTEA_*` environment overrides.
    pub fn from_env() -> Result<Self, VoiceError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let mut config = Self::default();
        if let Ok(v) = std::env::var("ARTEA_CAPTURE_BLOCK_SIZE") {
            config.capture_block_size = v
                .parse::<usize>()
                .map_err(|e| VoiceError::config("ARTEA_CAPTURE_BLOCK_SIZE", e))?;
        }
        if let Ok(v) = std::env::var("ARTEA_PLAYBACK_LEAD_MS") {
            let ms = v
                .parse::<u64>()
                .map_err(|e| VoiceError::config("ARTEA_PLAYBACK_LEAD_MS", e))?;
            config.playback_lead = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("ARTEA_CAPTURE_BLOCK_SIZE");
            env::remove_var("ARTEA_PLAYBACK_LEAD_MS");
        }
    }

    #[test]
    fn defaults_match_service_rates() {
        let config = VoiceConfig::default();
        assert_eq!(config.target_sample_rate, 16_000);
        assert_eq!(config.playback_sample_rate, 24_000);
        assert_eq!(config.capture_block_size, 4096);
        assert_eq!(config.playback_lead, Duration::from_millis(50));
    }

    #[test]
    #[serial]
    fn from_env_without_overrides_is_default() {
        clear_env_vars();
        let config = VoiceConfig::from_env().expect("config should load");
        assert_eq!(config.capture_block_size, 4096);
        assert_eq!(config.playback_lead, Duration::from_millis(50));
    }

    #[test]
    #[serial]
    fn from_env_applies_overrides() {
        clear_env_vars();
        unsafe {
            env::set_var("ARTEA_CAPTURE_BLOCK_SIZE", "2048");
            env::set_var("ARTEA_PLAYBACK_LEAD_MS", "80");
        }
        let config = VoiceConfig::from_env().expect("config should load");
        assert_eq!(config.capture_block_size, 2048);
        assert_eq!(config.playback_lead, Duration::from_millis(80));
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn from_env_rejects_invalid_values() {
        clear_env_vars();
        unsafe {
            env::set_var("ARTEA_PLAYBACK_LEAD_MS", "soon");
        }
        let err = VoiceConfig::from_env().unwrap_err();
        match err {
            VoiceError::Config { name, .. } => assert_eq!(name, "ARTEA_PLAYBACK_LEAD_MS"),
            other => panic!("expected Config error, got {other:?}"),
        }
        clear_env_vars();
    }
}
