//! Background daemon for the satchel wallet: binds the RPC channel,
//! hosts the consent queue, and fans queue events out to connected
//! contexts.

pub mod background;
pub mod config;
pub mod status;

pub use background::{Background, Collaborators};
pub use config::{DaemonConfig, DEFAULT_CHANNEL};
pub use status::{StatusService, STATUS_SERVICE};
