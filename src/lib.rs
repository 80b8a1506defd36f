pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod core;
pub mod db;
pub mod docs;
pub mod errors;
pub mod model;
pub mod models;
pub mod routes;
pub mod store;
pub mod utils;
