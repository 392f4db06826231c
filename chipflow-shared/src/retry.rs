//! # Retry Policy
//!
//! Transient-fault classification and the `x-retry-count` header discipline
//! a worker loop uses to decide between republishing a task and rejecting
//! it to the dead letter queue.

use crate::error::{RetryableError, TaskInputError};

/// AMQP header carrying the retry attempt count. Present only once a task
/// has failed transiently at least once; absent means attempt zero.
pub const RETRY_HEADER: &str = "x-retry-count";

/// Default maximum retry attempts, overridable via `TASK_MAX_RETRIES`.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Case-insensitive substrings that mark an exception's message as a
/// transient fault when the handler didn't raise [`RetryableError`]
/// explicitly.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "temporar",
    "connection reset",
    "connection aborted",
    "connection refused",
    "rate limit",
    "service unavailable",
];

/// The classification a worker loop assigns to a caught handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth a bounded retry via republish-with-incremented-header.
    Transient,
    /// The task's own input is unworkable; straight to the dead letter queue.
    InputError,
    /// Neither of the above; becomes a `FAILURE` result, not requeued.
    Other,
}

/// Classify a caught handler error. Explicit [`RetryableError`] and
/// [`TaskInputError`] types are recognized by downcast first; anything else
/// falls back to substring sniffing of the error's display text.
pub fn classify(err: &anyhow::Error) -> FailureClass {
    if err.downcast_ref::<RetryableError>().is_some() {
        return FailureClass::Transient;
    }
    if err.downcast_ref::<TaskInputError>().is_some() {
        return FailureClass::InputError;
    }
    if is_transient_message(&err.to_string()) {
        return FailureClass::Transient;
    }
    FailureClass::Other
}

/// Case-insensitive substring match against [`TRANSIENT_MARKERS`].
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Read the current retry count from a delivery's headers, defaulting to 0
/// when the header is absent or not an integer.
pub fn retry_count(headers: Option<&lapin::types::FieldTable>) -> u32 {
    headers
        .and_then(|table| table.inner().get(RETRY_HEADER))
        .and_then(|value| match value {
            lapin::types::AMQPValue::LongUInt(v) => Some(*v),
            lapin::types::AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
            lapin::types::AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
            lapin::types::AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
            _ => None,
        })
        .unwrap_or(0)
}

/// Build a header table for a republish carrying the incremented retry
/// count, preserving any other headers already on the delivery.
pub fn next_retry_headers(
    headers: Option<&lapin::types::FieldTable>,
) -> lapin::types::FieldTable {
    let mut table = headers.cloned().unwrap_or_default();
    let next = retry_count(Some(&table)) + 1;
    table.insert(
        RETRY_HEADER.into(),
        lapin::types::AMQPValue::LongUInt(next),
    );
    table
}
