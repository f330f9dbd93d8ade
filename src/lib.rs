pub mod config;
pub mod control;
pub mod hub;
pub mod instance;
pub mod poller;
pub mod probe;
pub mod process_monitor;
pub mod runtime;
pub mod server;
pub mod supervisor;
