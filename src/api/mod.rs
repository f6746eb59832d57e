//! HTTP and WebSocket surface of the game server

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod routes;
pub mod server;
pub mod websocket;

pub use handlers::AppState;
pub use server::{build_app, ApiServer};
