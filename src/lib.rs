pub mod cache;
pub mod calculator;
pub mod configuration;
pub mod controller;
pub mod dao;
pub mod error;
pub mod helpers;
pub mod model;
pub mod protocol;
pub mod provider;
pub mod retry;
pub mod server;
pub mod types;
