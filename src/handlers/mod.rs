//! HTTP handlers

pub mod health;
pub mod devices;
pub mod logs;
pub mod import;
