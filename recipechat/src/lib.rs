//! Chat transport client for the recipe assistant.
//!
//! A [`client::ChatClient`] talks to the assistant over one of two
//! strategies: a persistent WebSocket that reconnects with exponential
//! backoff, or a stateless HTTP fallback that posts one request per prompt.
//! Both publish the same `open`, `close`, `error`, `message` and `status`
//! events through an [`events::EventHub`], with inbound payloads normalized
//! into [`recipechat_proto::message::ChatMessage`].

pub mod address;
pub mod client;
pub mod config;
pub mod events;
pub mod normalize;
pub mod status;
pub mod transcript;
pub mod transport;
