pub mod connectors;
pub mod context;
pub mod metrics;
pub mod retry;
