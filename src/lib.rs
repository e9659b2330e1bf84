pub mod analytics;
pub mod api;
pub mod board;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod logging;
pub mod models;
pub mod server;
pub mod tenancy;
pub mod uploads;
pub mod wiki;
