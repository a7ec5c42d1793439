//
// lib.rs
// Dicom-Volume-Tools-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Conversion core.
pub mod attributes;
pub mod codec;
pub mod convert;
pub mod error;
pub mod geometry;
pub mod header_store;
pub mod orientation;
pub mod resolver;
pub mod series;
pub mod uid;
pub mod volume;
pub mod writer;

// Utilities; each mirrors a CLI verb.
pub mod batch;
pub mod copy_list;
pub mod headers;
pub mod info;
pub mod inventory;
pub mod stack;

// Shared plumbing.
pub mod cli;
pub mod config;
pub mod dicom_access;
pub mod logging;
pub mod models;
pub mod progress;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{Result, ToolError};
