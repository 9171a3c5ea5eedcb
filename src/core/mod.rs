pub mod app;
pub mod chat_stream;
pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod models;
pub mod persistence;
pub mod registry;
