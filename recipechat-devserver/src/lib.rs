//! `RecipeChat` development server library.
//!
//! A scripted stand-in for the real assistant backend. It speaks the chat
//! wire contract over `/ws` and answers the AI proxy `POST` endpoint, so the
//! client can be exercised end to end without network access.

pub mod config;
pub mod server;
