// Public API for the relay binary, client front-ends and integration tests

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod resume;
pub mod room;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod types;
pub mod ws;
