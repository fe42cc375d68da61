//! Client-side orchestration of a remote photogrammetry backend: ingestion
//! of a video or photo archive, photo curation, reconstruction and result
//! download.

pub mod config;
pub mod gateway;
pub mod orchestrator;
pub mod progress;
pub mod selection;

pub use config::{load_settings, Settings, Timings};
pub use gateway::{ApiResult, HttpGateway, Operation, PhotogrammetryApi};
pub use orchestrator::{Orchestrator, WorkflowError, WorkflowEvent, WorkflowSnapshot};
pub use selection::SelectionSet;
