//! slideforge: asynchronous slide-deck build service.
//!
//! Clients submit a generation request and upload a source bundle; a pool
//! of workers materializes the sources into an isolated workspace, runs the
//! Slidev toolchain, and publishes the static site under the owning course.

pub mod api;
pub mod build;
pub mod config;
pub mod humanize;
pub mod jobs;
pub mod notify;
pub mod observability;
pub mod pool;
pub mod storage;
pub mod workspace;
