pub mod models;
pub mod repo;
