//! Transport adapters implementing [`crate::application::Transport`].
//!
//! - **`lan`** – UDP broadcast advertising and discovery with one TCP link
//!   per connected peer.  Used by the `localsignal` binary.
//! - **`loopback`** – An in-process simulated radio for tests and the
//!   `--demo` mode.

pub mod lan;
pub mod loopback;

pub use lan::{LanConfig, LanTransport};
pub use loopback::{LoopbackMedium, LoopbackTransport};
