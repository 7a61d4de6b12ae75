#![forbid(unsafe_code)]

pub mod endpoint;
pub mod secret;
pub mod time;
