use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::pb;
use crate::pb::controllers_client::ControllersClient;
use crate::pb::mission_client::MissionClient;
use crate::pb::units_client::UnitsClient;
use crate::source::{EntitySource, RpcError, StreamUnitsOptions, UnitUpdateStream};
use crate::updates::{alarm_request_to_proto, AlarmState, AlarmTarget, SourceUpdate};

/// [`EntitySource`] backed by the mission server's gRPC API.
///
/// The channel connects lazily on first use and reconnects on its own, so one
/// instance can outlive any number of stream sessions. Construction must
/// happen inside a tokio runtime.
///
/// Only connection setup is bounded by `connect_timeout`; a per-request
/// deadline would also cut the long-lived unit stream, so callers bound
/// unary calls themselves.
#[derive(Clone)]
pub struct GrpcEntitySource {
    endpoint: String,
    channel: Channel,
}

impl GrpcEntitySource {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Result<Self, RpcError> {
        let endpoint = format!("http://{host}:{port}");
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|err| RpcError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                reason: err.to_string(),
            })?
            .connect_timeout(connect_timeout)
            .connect_lazy();
        Ok(Self { endpoint, channel })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EntitySource for GrpcEntitySource {
    async fn stream_units(
        &self,
        options: StreamUnitsOptions,
    ) -> Result<UnitUpdateStream, RpcError> {
        let mut client = MissionClient::new(self.channel.clone());
        let request = pb::StreamUnitsRequest {
            poll_rate: Some(options.poll_rate),
            max_backoff: Some(options.max_backoff),
        };
        debug!(
            target: "air_defense::rpc",
            endpoint = %self.endpoint,
            poll_rate = options.poll_rate,
            max_backoff = options.max_backoff,
            "stream_units.open"
        );
        let stream = client.stream_units(request).await?.into_inner();
        Ok(stream
            .map(|item| match item {
                Ok(update) => SourceUpdate::try_from_proto(update).map_err(RpcError::from),
                Err(status) => Err(RpcError::from(status)),
            })
            .boxed())
    }

    async fn unit_descriptor(&self, unit_name: &str) -> Result<Vec<String>, RpcError> {
        let mut client = UnitsClient::new(self.channel.clone());
        let response = client
            .get_unit_descriptor(pb::GetUnitDescriptorRequest {
                name: unit_name.to_string(),
            })
            .await?
            .into_inner();
        debug!(
            target: "air_defense::rpc",
            unit = unit_name,
            attributes = response.attributes.len(),
            "descriptor.fetched"
        );
        Ok(response.attributes)
    }

    async fn set_alarm_state(
        &self,
        target: &AlarmTarget,
        state: AlarmState,
    ) -> Result<(), RpcError> {
        let mut client = ControllersClient::new(self.channel.clone());
        client
            .set_alarm_state(alarm_request_to_proto(target, state))
            .await?;
        Ok(())
    }
}
