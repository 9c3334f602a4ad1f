//! Job lifecycle: entity, durable repository, business service, retention.

pub mod cleanup;
pub mod model;
pub mod repository;
pub mod service;
pub mod sql;

pub use cleanup::CleanupService;
pub use model::{Job, JobStatus};
pub use repository::{InMemoryJobRepository, JobFilter, JobRepository, RepositoryError};
pub use service::{JobService, JobServiceError, NewJob};
pub use sql::SqlJobRepository;
