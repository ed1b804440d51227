//! HTTP routes.

pub mod chat;
pub mod health;
pub mod models;
pub mod usage;
