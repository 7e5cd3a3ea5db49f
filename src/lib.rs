pub mod app;
pub mod cli;
pub mod clients;
pub mod config;
pub mod data;
pub mod flywheel;
pub mod logging;
pub mod services;
pub mod state;
pub mod utils;
pub mod web;
