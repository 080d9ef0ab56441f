//! Core control loop for the air-defense controller.
//!
//! A [`Service`] runs one [`Defender`] per configured game server. Each
//! Defender supervises a task group made of [`StreamIngest`], the unit store
//! applier and the [`AirspaceMonitor`], restarting the whole group from an
//! empty unit table whenever one of them stops.

pub mod config;
pub mod defender;
pub mod descriptors;
pub mod encyclopedia;
pub mod geo;
pub mod ingest;
pub mod monitor;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod unit;

pub use config::{
    load_configuration_from_env, ConfigError, Configuration, ConfigurationMetadata,
    DefenderConfig, GameServer, RpcEndpoint,
};
pub use defender::{Defender, DefenderPhase};
pub use descriptors::{DescriptorCache, DescriptorCacheError, UnitDescriptor};
pub use encyclopedia::{load_encyclopedia_from_env, Encyclopedia, EncyclopediaError, UnitEntry};
pub use geo::{great_circle_distance, GeoError};
pub use ingest::{IngestError, IngestExit, StreamIngest};
pub use monitor::{engagement_range, issue_alarm_state, AirspaceMonitor, TickReport};
pub use service::Service;
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use store::{drain, unit_queue, UnitStore};
pub use unit::{Position, Symbology, Unit};
