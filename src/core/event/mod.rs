pub mod event_loop;
pub mod poller;

pub use event_loop::EventLoop;
pub use poller::{Event, Interest, Poller};
