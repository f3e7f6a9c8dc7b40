//! Query and health API

pub mod routes;
mod server;
pub mod types;

pub use server::ApiServer;
