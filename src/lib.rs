//! Serve a flashcard collection to AI assistants over JSON-RPC while every
//! collection access stays on the host's single cooperative thread.

pub mod bridge;
pub mod collection;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod host;
pub mod logger;
pub mod operations;
pub mod poller;
pub mod prompts;
pub mod registry;
pub mod schema;
pub mod server;
