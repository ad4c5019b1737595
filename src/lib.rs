pub mod app;
pub mod archive;
pub mod config;
pub mod consent;
pub mod derived;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod output;
pub mod progress;
pub mod store;
