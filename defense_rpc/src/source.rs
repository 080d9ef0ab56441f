use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::updates::{AlarmState, AlarmTarget, SourceUpdate, UpdateDecodeError};

/// Stream of decoded unit updates. Dropping it closes the underlying call.
pub type UnitUpdateStream = BoxStream<'static, Result<SourceUpdate, RpcError>>;

/// Hints sent to the server when opening the unit stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamUnitsOptions {
    /// Seconds between server-side polls of unit positions.
    pub poll_rate: u32,
    /// Upper bound, in seconds, on the server's back-off for stationary units.
    pub max_backoff: u32,
}

impl Default for StreamUnitsOptions {
    fn default() -> Self {
        Self {
            poll_rate: 1,
            max_backoff: 30,
        }
    }
}

/// Failure reported by the remote entity source.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("call cancelled: {0}")]
    Cancelled(String),
    #[error("server unavailable: {0}")]
    Unavailable(String),
    #[error("server returned {code:?}: {message}")]
    Status { code: tonic::Code, message: String },
    #[error("malformed update: {0}")]
    Malformed(#[from] UpdateDecodeError),
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

impl RpcError {
    /// Cancellation means somebody asked the call to stop; it is not a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled(_))
    }

    /// Malformed updates are dropped individually and never end a stream.
    pub fn is_malformed(&self) -> bool {
        matches!(self, RpcError::Malformed(_))
    }
}

impl From<tonic::Status> for RpcError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Cancelled => RpcError::Cancelled(status.message().to_string()),
            tonic::Code::Unavailable => RpcError::Unavailable(status.message().to_string()),
            code => RpcError::Status {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

/// Remote simulation the controller observes and commands.
///
/// Implementations must be cheap to share between tasks; every Defender holds
/// one behind an `Arc` and calls into it from its ingest and monitor tasks
/// concurrently.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Open the continuous unit stream.
    async fn stream_units(&self, options: StreamUnitsOptions)
        -> Result<UnitUpdateStream, RpcError>;

    /// Fetch the capability attributes of the unit called `unit_name`.
    async fn unit_descriptor(&self, unit_name: &str) -> Result<Vec<String>, RpcError>;

    /// Command a unit or a whole group to `state`.
    async fn set_alarm_state(&self, target: &AlarmTarget, state: AlarmState)
        -> Result<(), RpcError>;
}
