//! End-to-end scenarios for the connector runtime, driven through an
//! in-process broker.

pub mod broker;
pub mod utils;
