pub mod catalog;
pub mod config;
pub mod console;
pub mod render;
