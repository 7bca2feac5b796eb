pub mod chrony_conf;
pub mod cli;
pub mod command;
pub mod config;
pub mod parse;
pub mod protocol;
pub mod server;
pub mod service;
pub mod status;
pub mod supervisor;
