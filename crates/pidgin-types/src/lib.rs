//! Shared data model for the Pidgin workspace: messages, agents,
//! conversations, the closed event set, configuration, and the crate-wide
//! error type. No bus, provider, or orchestration logic lives here — see
//! `pidgin-core` and `pidgin-providers`.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod message;
pub mod stream;

pub use agent::{Agent, AgentId};
pub use config::Config;
pub use conversation::{short_hex_id, Conversation, Turn};
pub use error::{Error, Result};
pub use event::Event;
pub use message::{Message, Role};
pub use stream::{BoxStream, StreamEvent, Usage};
