// Library exports for the tether supervisor

pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod process;
pub mod signals;
