pub mod timestamp;
pub mod taxonomy;
pub mod classifier;
pub mod filter;
pub mod aggregate;
pub mod store;
pub mod pipeline;
pub mod report;
pub mod config;
pub mod logging;
