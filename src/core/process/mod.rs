pub mod channel;
pub mod pool;
pub mod termination;

pub use channel::{ChannelEnd, ChannelRecv, Transfer};
pub use pool::{ForkHook, ProcessRole, Split, WorkerContext, WorkerPool, WorkerSlot};
pub use termination::TerminationReason;
