mod log_store;
mod mem_log;
mod snapshot;
mod state_machine;

pub use log_store::*;
pub use mem_log::*;
pub use snapshot::*;
pub use state_machine::*;
