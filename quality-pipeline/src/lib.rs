#![allow(clippy::missing_docs_in_private_items)]

pub mod analyser;
pub mod scheduler;

pub use analyser::ThumbsDownAnalyser;
pub use scheduler::QualityScheduler;
