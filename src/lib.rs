pub mod api;
pub mod auth;
pub mod cameras;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
mod locks;
pub mod logging;
pub mod maintenance;
pub mod media;
pub mod mqtt;
pub mod notify;
pub mod server;
pub mod settings;
pub mod users;
pub mod webhook;


pub use error::*;
