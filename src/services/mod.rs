pub mod config_store;
pub mod event_manager;
pub mod help;
