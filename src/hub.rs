//! Live traffic broadcast
//!
//! One relay runs per listening connection. It subscribes to the inbound
//! and outbound bus topics, turns every event into a [`BroadcastFrame`] and
//! hands it to the connection's [`FrameWriter`]. The first failed write (or
//! an explicit close) ends the relay: both subscriptions are removed, then
//! whatever was already queued for this listener is drained so no publisher
//! stays parked on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{BusEvent, EventBus, Inspect, Subscription, Topic};
use crate::error::Result;

/// Frame pushed to live listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastFrame {
    /// Payload type tag
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable payload rendering
    pub dump: String,
    /// Destination host; empty for inbound traffic
    pub host: String,
}

impl BroadcastFrame {
    pub fn from_event(event: &BusEvent) -> Self {
        let payload = event.payload();
        Self {
            kind: payload.type_tag().to_string(),
            dump: payload.render(),
            host: event.host().to_string(),
        }
    }
}

/// Serializes one frame onto a listener connection
#[async_trait]
pub trait FrameWriter: Send {
    /// Transmit a frame; an error means the listener is gone
    async fn write_frame(&mut self, frame: &BroadcastFrame) -> Result<()>;
}

/// Why a relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The writer reported a failure
    WriterFailed,
    /// The connection was closed by the listener
    Closed,
    /// The bus dropped one of the subscriptions
    BusClosed,
}

/// Summary of a finished relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub outcome: RelayOutcome,
    /// Frames successfully written
    pub frames_sent: u64,
    /// Queued events discarded during teardown
    pub drained: usize,
}

/// Relay bus traffic to `writer` until it fails or `close` is cancelled
pub async fn relay<W>(bus: &dyn EventBus, writer: &mut W, close: CancellationToken) -> RelayReport
where
    W: FrameWriter + ?Sized,
{
    let mut inbound = bus.subscribe(Topic::Inbound);
    let mut outbound = bus.subscribe(Topic::Outbound);
    let mut frames_sent = 0u64;

    let outcome = loop {
        let event = tokio::select! {
            _ = close.cancelled() => break RelayOutcome::Closed,
            event = inbound.recv() => event,
            event = outbound.recv() => event,
        };

        let Some(event) = event else {
            break RelayOutcome::BusClosed;
        };

        let frame = BroadcastFrame::from_event(&event);
        if let Err(e) = writer.write_frame(&frame).await {
            debug!("Listener write failed: {}", e);
            break RelayOutcome::WriterFailed;
        }
        frames_sent += 1;
    };

    bus.unsubscribe(&inbound);
    bus.unsubscribe(&outbound);
    let drained = drain(&mut inbound) + drain(&mut outbound);

    debug!(
        "Stopping listener relay ({:?}, {} frames sent, {} drained)",
        outcome, frames_sent, drained
    );

    RelayReport {
        outcome,
        frames_sent,
        drained,
    }
}

/// Discard events already queued on a subscription without waiting
fn drain(subscription: &mut Subscription) -> usize {
    let mut drained = 0;
    while subscription.try_recv().is_some() {
        drained += 1;
    }
    drained
}
