//! Forwarding history from the LND switch.

use async_trait::async_trait;
use pegin_service::{ForwardingEvent, ForwardingHistorySource, ForwardingPage, HistoryError};

use crate::{
    client::LndClient,
    wire::{ForwardingHistoryRequest, ForwardingHistoryResponse, RpcForwardingEvent},
};

impl From<RpcForwardingEvent> for ForwardingEvent {
    fn from(e: RpcForwardingEvent) -> Self {
        ForwardingEvent {
            timestamp_ns: e.timestamp_ns,
            chan_id_in: e.chan_id_in,
            chan_id_out: e.chan_id_out,
            amt_in: e.amt_in,
            amt_out: e.amt_out,
            fee_msat: e.fee_msat,
        }
    }
}

#[async_trait]
impl ForwardingHistorySource for LndClient {
    async fn forwarding_history(
        &self,
        start_secs: u64,
        offset: u32,
        max_events: u32,
    ) -> Result<ForwardingPage, HistoryError> {
        let req = ForwardingHistoryRequest {
            start_time: start_secs,
            index_offset: offset,
            num_max_events: max_events,
            peer_alias_lookup: false,
        };
        let resp: ForwardingHistoryResponse = self.post("/v1/switch", &req).await?;
        Ok(ForwardingPage {
            events: resp.forwarding_events.into_iter().map(Into::into).collect(),
            last_offset_index: resp.last_offset_index,
        })
    }
}
