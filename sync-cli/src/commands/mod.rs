//! CLI command implementations.

pub mod diff;
pub mod init;
pub mod scan;
pub mod sync;
