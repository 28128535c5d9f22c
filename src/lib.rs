pub mod attendance;
pub mod checkin;
pub mod config;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod qr;
pub mod registration;
pub mod routes;
pub mod state;
pub mod utils;
