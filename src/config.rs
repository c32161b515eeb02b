use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Startup configuration for the player
pub struct PlayerConfig {
    /// Repeat the current song instead of advancing
    pub song_looping: bool,
    /// Wrap to the first song after the last one
    pub playlist_looping: bool,
    /// Playback speed relative to the file tempo (1.0 = as written)
    pub tempo_factor: f32,
    /// Case-insensitive substring of the output port name; first port if unset
    pub port: Option<String>,
    /// Client name registered with the platform MIDI system
    pub client_name: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            song_looping: false,
            playlist_looping: false,
            tempo_factor: 1.0,
            port: None,
            client_name: "e_midi_engine".to_string(),
        }
    }
}

impl PlayerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: PlayerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tempo_factor.is_finite() || self.tempo_factor <= 0.0 {
            return Err(EngineError::Config(format!(
                "tempo_factor must be a positive number, got {}",
                self.tempo_factor
            )));
        }
        if self.client_name.trim().is_empty() {
            return Err(EngineError::Config("client_name must not be empty".to_string()));
        }
        Ok(())
    }
}
