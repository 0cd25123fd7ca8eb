//! Slack side of the ESI bot
//!
//! - **Commands** (`commands`) - inbound text parsing, the action registry and dispatcher
//! - **Actions** (`actions`, `status`, `proxy`) - built-in handlers behind each trigger
//! - **Replies** (`blocks`) - message/attachment model and reply templates
//! - **Events** (`events`) - message events routed to the command dispatcher
//! - **Monitor** (`monitor`) - periodic route status refresh and change announcements
//! - **Sink** (`sink`) - outbound message capability
//!
//! # Architecture
//!
//! ```text
//! Slack Events → MessageHandler → CommandDispatcher → Action
//!                                        ↓
//!                               MessageSink ← Reply
//! ```

pub mod actions;
pub mod blocks;
pub mod commands;
pub mod events;
pub mod monitor;
pub mod proxy;
pub mod sink;
pub mod status;
