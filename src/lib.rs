pub mod availability;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod registry;
pub mod rules;
pub mod sql;
pub mod stats;
pub mod store;
pub mod wal;
pub mod wire;
