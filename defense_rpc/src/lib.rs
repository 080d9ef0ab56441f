//! Wire boundary for the air-defense controller.
//!
//! This crate owns the protobuf contract spoken by the remote mission server,
//! the [`EntitySource`] abstraction the control loop is written against, and
//! the conversions that turn wire messages into plain domain records. Nothing
//! here knows about unit stores, descriptor caches or alarm decisions.

mod grpc;
mod source;
mod updates;

/// Generated protobuf and tonic client bindings.
#[allow(clippy::all)]
pub mod pb {
    tonic::include_proto!("dcs");
}

pub use grpc::GrpcEntitySource;
pub use source::{EntitySource, RpcError, StreamUnitsOptions, UnitUpdateStream};
pub use updates::{
    AlarmState, AlarmTarget, Coalition, SourceUpdate, UnitRecord, UpdateDecodeError,
};
