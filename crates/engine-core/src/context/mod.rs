pub mod exec;
pub mod node;
pub mod pause;
pub mod poll;
pub mod restart;
pub mod snapshot;

pub use exec::{ExecutionContext, Scope};
pub use node::NodeStatus;
pub use poll::BatchPollContext;
pub use restart::RestartContext;
