pub mod connector;
pub mod error;
pub mod logging;
pub mod task;
pub mod worker;

pub use connector::ConnectorSupervisor;
pub use worker::Worker;
