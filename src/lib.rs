pub mod base;
pub mod cli;
pub mod client;
pub mod ops;
mod prelude;
pub mod repository;
pub mod settings;
pub mod utils;
