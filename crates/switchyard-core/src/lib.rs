//! Domain layer of the Switchyard coordination core.
//!
//! Holds the data model, the error taxonomy, configuration and the traits that
//! registry and state-tier backends implement. No I/O happens here.

pub mod call;
pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod state;
pub mod workflow;

pub use call::CallOptions;
pub use config::SwitchyardConfig;
pub use error::{Result, SwitchyardError};
