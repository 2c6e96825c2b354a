// Core: configuration, shared schemas, process lifecycle and application state.
pub mod config;
pub mod config_store;
pub mod schemas;
pub mod shutdown;
pub mod state;
