//! Client side of the chat gateway: a stream decoder and an HTTP client
//! that drives it.

pub mod client;
pub mod consumer;

pub use client::{ChatClient, TurnOutcome};
pub use consumer::{ConsumerUpdate, StreamConsumer};
