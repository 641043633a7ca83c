pub mod api;
pub mod billing;
pub mod config;
pub mod cursor;
pub mod enrichment;
pub mod events;
pub mod leads;
pub mod models;
pub mod pipeline;
pub mod redirect;
pub mod scoring;
pub mod session;
pub mod storage;
