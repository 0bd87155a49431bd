//! Baton Common
//!
//! Ambient pieces shared by the Baton crates and binaries.

pub mod logging;

pub use logging::init_logging;
