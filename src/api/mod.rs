//! Read-only HTTP surface over the monitor and the store

pub mod rest;

pub use rest::{ApiResponse, RestApi};
