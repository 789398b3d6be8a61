pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod runtime;
pub mod schemas;
