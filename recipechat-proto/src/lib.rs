//! Shared protocol definitions for the `RecipeChat` wire format.

pub mod envelope;
pub mod message;
pub mod proxy;
