//! # relay-core
//!
//! Topic broker and subscriber lifecycle for the Relay live stream server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Broker** - Topic registry with attach/detach, subscribe/unsubscribe and broadcast
//! - **Subscriber** - A consumer endpoint with a bounded inbox and a one-shot closing signal
//! - **Inbox** - Bounded per-subscriber queue with a drop policy for overflow
//! - **Message** - Immutable chunk shared by every recipient of a broadcast
//! - **Topic** - `"<app>/<stream>"` key composition and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  broadcast  ┌─────────────┐  try-enqueue  ┌─────────────┐
//! │  Publisher  │────────────▶│   Broker    │──────────────▶│ Subscriber  │──▶ drain
//! └─────────────┘             └─────────────┘               └─────────────┘
//!                                    │ attach / detach
//!                                    ▼
//!                             ┌─────────────┐
//!                             │  Directory  │
//!                             └─────────────┘
//! ```
//!
//! Delivery is best effort: broadcasting never blocks on a subscriber and a
//! full inbox is resolved by its [`OverflowPolicy`].

pub mod broker;
pub mod inbox;
pub mod message;
pub mod subscriber;
pub mod topic;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerStats, Fanout};
pub use inbox::{Delivery, OverflowPolicy};
pub use message::Message;
pub use subscriber::{Subscriber, SubscriberId};
pub use topic::{stream_topic, TopicError};
