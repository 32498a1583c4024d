//! HTTP route handlers

pub mod clients;
pub mod health;
pub mod stats;
