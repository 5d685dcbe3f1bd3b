pub mod event;
pub mod net;
pub mod process;
