//! HTTP surface: thin glue over the job and storage services.

pub mod error;
pub mod models;
pub mod server;
pub mod services;
pub mod state;
pub mod validation;

pub use error::ApiError;
pub use server::{router, run};
pub use state::AppState;
