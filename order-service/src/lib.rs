pub mod api;
pub mod catalog;
pub mod models;
pub mod pickup;
pub mod reservations;
pub mod schema;
pub mod settlement;
pub mod sweep;
