//! Command handlers for `chipflow-ctl`.

pub(crate) mod dlq;
pub(crate) mod run;
