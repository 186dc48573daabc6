pub mod collector;
pub mod config;
pub mod export;
pub mod zoneminder;
