//! Domain layer: pure endpoint bookkeeping with no I/O.

pub mod endpoint;
pub mod lifecycle;
pub mod payload;
pub mod registry;
pub mod service;
pub mod signal;
pub mod status;
