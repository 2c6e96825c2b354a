#![allow(clippy::result_large_err)]
// Library entrypoint for the server binary and integration tests.
mod api;
mod core;
mod orchestrator;
pub mod sandbox;
mod services;
pub mod storage;

pub use api::build_router;
pub use core::{config, config_store, schemas, shutdown, state};
pub use orchestrator::{CreatedProject, GenerationOutcome, Orchestrator, OrchestratorError};
pub use services::{history, llm, tools};
