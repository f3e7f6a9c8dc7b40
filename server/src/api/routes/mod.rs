//! API route handlers

pub mod buffer;
pub mod health;
pub mod quality;
pub mod rollups;
