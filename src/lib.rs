pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod products;
pub mod state;
pub mod storage;
pub mod testing;
