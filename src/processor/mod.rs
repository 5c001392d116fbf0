//! Background job processor (spec §4.4, §5): a long-running scheduler that
//! polls the job store, drives each NEW job through the pipeline stages in
//! order, and updates the job store after every stage.

pub mod http;
pub mod scheduler;
pub mod stages;

pub use scheduler::{Processor, ProcessorStatus};
pub use stages::StageError;
