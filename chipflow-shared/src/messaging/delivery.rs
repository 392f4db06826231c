//! A received message together with whatever is needed to (n)ack it, kept
//! broker-agnostic so worker and orchestrator code never matches on the
//! underlying provider.

use lapin::types::FieldTable;

/// Handle back to the originating provider, used only by that provider's
/// own `ack`/`nack`/`republish_with_retry` implementations.
#[derive(Debug)]
pub(crate) enum AckHandle {
    Amqp(Box<lapin::message::Delivery>),
    InMemory { queue: String, id: u64 },
}

/// One pulled message, decoupled from the transport that produced it.
#[derive(Debug)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub headers: Option<FieldTable>,
    pub routing_key: String,
    /// The AMQP `priority` property the message was published with, if any.
    /// Carried separately from `headers` since it's a `BasicProperties`
    /// field, not a header — and retained so a retry republish can restore
    /// it rather than resetting priority to none.
    pub priority: Option<u8>,
    pub(crate) ack_handle: AckHandle,
}
