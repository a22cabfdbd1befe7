pub mod args;
pub mod cli;
pub mod config;
pub mod github;
pub mod http;
pub mod mcp;
pub mod poll;
pub mod server;
pub mod tools;
pub mod wait;
