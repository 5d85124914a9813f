pub mod api;
pub mod config;
pub mod db;
pub mod digest;
pub mod model;
pub mod notifier;
pub mod providers;
pub mod render;
pub mod scheduler;
