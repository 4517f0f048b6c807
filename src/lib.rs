pub mod atlas;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod layout;
pub mod manifest;
pub mod orchestrator;
pub mod output;
pub mod recon;
pub mod scratch;
pub mod signal;
pub mod status;
pub mod steps;
pub mod tools;
