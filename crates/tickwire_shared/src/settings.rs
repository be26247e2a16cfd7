//! # Host Settings
//!
//! Bounds fed into the command channel, frame cache, controller buffers and
//! tick loop. Loaded once at startup, usually from a TOML file:
//!
//! ```toml
//! port = 9992
//! tick_frequency = 60
//! send_rate = 2
//! server_name = "arena-01"
//!
//! [commands]
//! max_commands_in_queue = 128
//! ```
//!
//! Every field has a default; a missing file section falls back to it.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{DEFAULT_ADDRESS, DEFAULT_PORT, MAX_PACKET_SIZE, MAX_RELIABLE_PACKET_SIZE};

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Settings file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file is not valid TOML for [`HostSettings`].
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside the range the protocol can work with.
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Result type for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Command channel bounds.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Largest serialized command payload, in bytes.
    pub max_command_size: usize,
    /// Commands buffered per direction before the oldest is evicted.
    pub max_commands_in_queue: usize,
    /// Commands written into a single packet.
    pub max_commands_in_packet: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            max_command_size: 1024,
            max_commands_in_queue: 64,
            max_commands_in_packet: 64,
        }
    }
}

/// Controller input buffer bounds.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Predicted inputs the client keeps awaiting confirmation.
    pub client_input_buffer_size: usize,
    /// Received inputs the server keeps awaiting simulation.
    pub server_input_buffer_size: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            client_input_buffer_size: 64,
            server_input_buffer_size: 64,
        }
    }
}

/// Transport timeouts, handed through to the transport layer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Idle time before a peer is considered gone.
    pub timeout_ms: u32,
    /// Lower clamp for adaptive timeouts.
    pub timeout_min_ms: u32,
    /// Upper clamp for adaptive timeouts.
    pub timeout_max_ms: u32,
    /// Keep-alive ping interval.
    pub ping_interval_ms: u32,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            timeout_min_ms: 1_000,
            timeout_max_ms: 30_000,
            ping_interval_ms: 500,
        }
    }
}

/// Complete host configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Listen or connect address.
    pub address: String,
    /// Game port.
    pub port: u16,
    /// Connections a server accepts.
    pub max_connections: usize,
    /// Name the server advertises during the handshake.
    pub server_name: String,
    /// Name a client announces when joining.
    pub player_name: String,
    /// Simulation ticks per second.
    pub tick_frequency: u32,
    /// Ticks between outbound packets.
    pub send_rate: u32,
    /// Age limit for a snapshot baseline, in milliseconds.
    pub delta_frame_window_ms: u32,
    /// Frames the server keeps per connection awaiting acknowledgement.
    pub frame_cache_count: usize,
    /// Largest unreliable packet, in bytes.
    pub max_packet_size: usize,
    /// Largest reliable packet, in bytes.
    pub max_reliable_packet_size: usize,
    /// Transport timeouts.
    pub timeouts: TimeoutSettings,
    /// Command channel bounds.
    pub commands: CommandSettings,
    /// Controller buffer bounds.
    pub controller: ControllerSettings,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            port: DEFAULT_PORT,
            max_connections: 1024,
            server_name: "tickwire".to_owned(),
            player_name: "Anonymous".to_owned(),
            tick_frequency: 60,
            send_rate: 1,
            delta_frame_window_ms: 1000,
            frame_cache_count: 20,
            max_packet_size: MAX_PACKET_SIZE,
            max_reliable_packet_size: MAX_RELIABLE_PACKET_SIZE,
            timeouts: TimeoutSettings::default(),
            commands: CommandSettings::default(),
            controller: ControllerSettings::default(),
        }
    }
}

impl HostSettings {
    /// Parses and validates settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] on malformed input and
    /// [`SettingsError::Invalid`] if validation fails.
    pub fn from_toml_str(text: &str) -> SettingsResult<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads and validates settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] if the file can't be read, otherwise
    /// as [`HostSettings::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> SettingsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks the bounds the protocol depends on.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> SettingsResult<()> {
        let invalid = |field, reason| Err(SettingsError::Invalid { field, reason });

        if self.tick_frequency == 0 || self.tick_frequency > 1000 {
            return invalid("tick_frequency", "must be between 1 and 1000");
        }
        if self.send_rate == 0 {
            return invalid("send_rate", "must be at least 1");
        }
        if self.frame_cache_count == 0 {
            return invalid("frame_cache_count", "must be at least 1");
        }
        if self.max_packet_size < 16 {
            return invalid("max_packet_size", "must be at least 16 bytes");
        }
        if self.max_reliable_packet_size < 16 {
            return invalid("max_reliable_packet_size", "must be at least 16 bytes");
        }
        if self.commands.max_command_size == 0 {
            return invalid("commands.max_command_size", "must be at least 1");
        }
        if self.commands.max_commands_in_queue == 0 {
            return invalid("commands.max_commands_in_queue", "must be at least 1");
        }
        if self.commands.max_commands_in_packet == 0 {
            return invalid("commands.max_commands_in_packet", "must be at least 1");
        }
        if self.controller.client_input_buffer_size == 0
            || self.controller.server_input_buffer_size == 0
        {
            return invalid("controller", "input buffers must hold at least 1 input");
        }
        Ok(())
    }

    /// Wall-clock duration of one tick.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_frequency.max(1)))
    }

    /// Whole milliseconds per tick, as used for the baseline window.
    #[must_use]
    pub fn tick_interval_ms(&self) -> u32 {
        (1000 / self.tick_frequency.max(1)).max(1)
    }

    /// Age limit for a snapshot baseline, in ticks.
    #[must_use]
    pub fn delta_frame_window_ticks(&self) -> i32 {
        i32::try_from(self.delta_frame_window_ms / self.tick_interval_ms()).unwrap_or(i32::MAX)
    }

    /// Send rate as a signed tick count.
    #[must_use]
    pub fn send_rate_ticks(&self) -> i32 {
        i32::try_from(self.send_rate.max(1)).unwrap_or(i32::MAX)
    }
}
