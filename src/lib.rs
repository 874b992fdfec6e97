pub mod access;
pub mod analytics;
pub mod api;
pub mod app;
pub mod auth;
pub mod clock;
pub mod codegen;
pub mod config;
pub mod error;
pub mod models;
pub mod password;
pub mod redirect;
pub mod registry;
pub mod storage;

pub use app::App;
