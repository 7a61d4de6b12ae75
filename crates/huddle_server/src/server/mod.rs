#![forbid(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod http;
pub mod presence;
pub mod registry;
pub mod room_hub;
pub mod router;
pub mod store;

#[cfg(test)]
mod registry_tests;
