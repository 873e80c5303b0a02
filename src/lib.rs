pub mod config;
pub mod errors;
pub mod init;
pub mod logging;
pub mod workflow;

pub use errors::{CardError, CardResult, Missing, ValidationRule};
