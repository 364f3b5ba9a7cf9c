pub mod app;
pub mod config;
pub mod event;
pub mod library;
pub mod logging;
pub mod prefs;
pub mod sketch;
pub mod store;
pub mod sync;
pub mod theme;
pub mod worker;
