pub mod catalog;
pub mod cleanup;
pub mod cms;
pub mod config;
pub mod convert;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod product;
pub mod publish;
pub mod selector;
pub mod storage;
pub mod timer;
pub mod validation;

pub use config::BenchConfig;
pub use error::{CleanupWarning, StageError};
pub use pipeline::{Orchestrator, PipelineConfig, RunOutcome, RunReport, Stage, StageReport};
pub use product::{CandidateSet, Product, SelectionWindow};
pub use timer::{Timer, TimerCounter};
