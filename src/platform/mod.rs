//! Platform abstraction: mount table access and volume selection.

pub mod pal;
