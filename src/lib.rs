//! unsub-assist: automated unsubscribe resolution.

pub mod agent;
pub mod browser;
pub mod config;
pub mod error;
pub mod llm;
pub mod message;
pub mod store;
pub mod unsubscribe;
