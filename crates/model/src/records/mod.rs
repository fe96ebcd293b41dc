pub mod batch;
pub mod message;
pub mod partition;
pub mod record;
pub mod status;
