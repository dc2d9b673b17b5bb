pub mod commands;
pub mod config;
pub mod context;
pub mod database;
pub mod extractor;
pub mod features;
pub mod lightgbm;
pub mod models;
pub mod preprocessor;
pub mod simulator;
pub mod trainer;
