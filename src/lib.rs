//! Spanreport: span trees with query timings, memory deltas, and a
//! fixed-width report comparing repeated runs.

mod alloc_counter;
mod capture;
mod config;
mod dedup;
mod engine;
mod error;
mod format;
mod group;
mod render;
mod report_cmd;
mod span;
mod sql_summary;
mod stat;
mod store;

pub use alloc_counter::*;
pub use capture::*;
pub use config::*;
pub use dedup::*;
pub use engine::*;
pub use error::*;
pub use format::*;
pub use group::*;
pub use render::*;
pub use report_cmd::*;
pub use span::*;
pub use sql_summary::*;
pub use stat::*;
pub use store::*;
