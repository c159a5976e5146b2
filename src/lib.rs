#![forbid(unsafe_code)]

//! Shai-Hulud scanner (shs) — finds every local git repository and checks it
//! for indicators of compromise left by the Shai-Hulud npm supply-chain worm.
//!
//! Four indicator checks run per repository:
//! 1. **Branches** — remote head branches whose name matches the worm's pattern
//! 2. **Packages** — denylisted dependencies in manifests and lockfiles
//! 3. **File hashes** — SHA-256 digests of script files against a hash denylist
//! 4. **Filenames** — files matching denylisted glob patterns
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use shai_hulud_scanner::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use shai_hulud_scanner::core::config::Config;
//! use shai_hulud_scanner::scanner::orchestrator::ScanOrchestrator;
//! ```

pub mod prelude;

pub mod core;
pub mod denylist;
pub mod logger;
pub mod platform;
pub mod scanner;
