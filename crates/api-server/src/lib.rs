#![warn(clippy::unwrap_used)]

pub mod funnel_rest;
pub mod rest;
pub mod server;
pub mod webhook;

pub use server::ApiServer;
