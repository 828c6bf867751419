// Application layer: the deployed functions and the API Gateway plumbing they share.

pub mod handlers;
pub mod http;
pub mod registry;

pub use registry::{standard_registry, Buckets};
