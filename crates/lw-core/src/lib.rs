pub mod config;
pub mod debounce;
pub mod file_watcher;
pub mod language;
pub mod types;
