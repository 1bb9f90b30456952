pub mod acbot;
pub mod acdb;
pub mod access;
pub mod actions;
pub mod admin;
pub mod aggregate;
pub mod config;
pub mod errors;
pub mod levels;
pub mod models;
pub mod profile;
pub mod progress;
