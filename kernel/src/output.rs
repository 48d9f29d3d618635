//! Kernel log output.
//!
//! The leveled macros in [`macros`] are exported at the crate root; which of
//! them emit anything is decided by the `log-*` cargo features.

pub mod macros;
