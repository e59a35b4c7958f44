pub mod auth;
pub mod charts;
pub mod config;
pub mod db;
pub mod errors;
pub mod filters;
pub mod instructor;
pub mod registry;
pub mod routes;
pub mod student;
pub mod tables;

pub use crate::errors::{AppError, AppResult};
pub use crate::routes::{build_router, AppState};
