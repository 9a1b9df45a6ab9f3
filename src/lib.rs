pub mod app;
pub mod billing;
pub mod capability;
pub mod channel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod facts;
pub mod format;
pub mod handlers;
pub mod request;
pub mod sanitize;
pub mod settings;
pub mod task;
