mod task;
mod write_queue;

pub use task::WriteTask;
pub use write_queue::{QueueState, ShutdownReport, WriteQueue};
