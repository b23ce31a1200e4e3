//! IPC module for external toggles and status queries

mod protocol;
mod server;

pub use server::Server;
