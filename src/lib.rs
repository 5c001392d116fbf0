pub mod api;
pub mod config;
pub mod humanize;
pub mod job_store;
pub mod observability;
pub mod pipeline;
pub mod processor;
pub mod providers;
pub mod state_machine;
pub mod storage;
