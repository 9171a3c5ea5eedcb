//! Colloquy is a client-side chat session engine for OpenAI-compatible
//! streaming APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns conversation state (messages, sessions, the registry),
//!   decodes streamed responses, drives generations through the
//!   [`core::app::ChatEngine`] and persists snapshots of the registry.
//! - [`api`] defines the chat payloads sent to and received from the backend,
//!   plus the [`api::backend::ChatBackend`] seam and its HTTP implementation.
//! - [`cli`] is a thin line-oriented front end over the engine.
//! - [`utils`] holds URL helpers and logging setup.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
