//! Scan logging: JSONL append-only plus a human-readable text log, both fed
//! from one background thread with graceful degradation.

pub mod dispatch;
pub mod jsonl;
pub mod text;
