//! Turning include/exclude patterns into the set of files an artifact ships.

pub mod files;
pub mod globs;
