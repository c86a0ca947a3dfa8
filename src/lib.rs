pub mod cli;
pub mod error;
pub mod logging;
pub mod notification;
pub mod panel;
pub mod remote;
pub mod settings;
pub mod sync;
pub mod types;
