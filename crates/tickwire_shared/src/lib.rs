//! # Tickwire Shared
//!
//! Common types used by both client and server.
//!
//! ## Contents
//!
//! - [`ids`]: entity, prefab, state and command identifiers
//! - [`math`]: small vector types with interpolation
//! - [`constants`]: wire limits both ends must agree on
//! - [`settings`]: host configuration, loadable from TOML

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod math;
pub mod settings;

pub use constants::{DEFAULT_PORT, MAX_PACKET_SIZE, MAX_RELIABLE_PACKET_SIZE};
pub use ids::{CommandId, Entity, EntityId, PrefabId, StateId};
pub use math::{lerp, Vec2, Vec3};
pub use settings::{
    CommandSettings, ControllerSettings, HostSettings, SettingsError, SettingsResult,
    TimeoutSettings,
};
