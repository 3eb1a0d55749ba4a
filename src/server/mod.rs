//! HTTP control API for a running node.

pub mod routes;

pub use routes::{create_router, serve};
