use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::blocks::Reply;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("message delivery transport failed: {0}")]
    Transport(String),
    #[error("slack rejected the request: {0}")]
    Rejected(String),
}

/// Outbound side of the bot. Callers log failures; nothing here retries.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn post(&self, channel: &str, reply: &Reply) -> Result<(), SinkError>;

    async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        reaction: &str,
    ) -> Result<(), SinkError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedReply {
    pub channel: String,
    pub reply: Reply,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddedReaction {
    pub channel: String,
    pub timestamp: String,
    pub reaction: String,
}

/// Sink that keeps everything in memory, for wiring checks and tests.
#[derive(Default)]
pub struct RecordingSink {
    posts: Mutex<Vec<PostedReply>>,
    reactions: Mutex<Vec<AddedReaction>>,
    reject_posts: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self { reject_posts: true, ..Self::default() }
    }

    pub fn posts(&self) -> Vec<PostedReply> {
        self.posts.lock().map(|posts| posts.clone()).unwrap_or_default()
    }

    pub fn posts_to(&self, channel: &str) -> Vec<Reply> {
        self.posts()
            .into_iter()
            .filter(|posted| posted.channel == channel)
            .map(|posted| posted.reply)
            .collect()
    }

    pub fn reactions(&self) -> Vec<AddedReaction> {
        self.reactions.lock().map(|reactions| reactions.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn post(&self, channel: &str, reply: &Reply) -> Result<(), SinkError> {
        if self.reject_posts {
            return Err(SinkError::Rejected("channel_not_found".to_owned()));
        }
        if let Ok(mut posts) = self.posts.lock() {
            posts.push(PostedReply { channel: channel.to_owned(), reply: reply.clone() });
        }
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        reaction: &str,
    ) -> Result<(), SinkError> {
        if let Ok(mut reactions) = self.reactions.lock() {
            reactions.push(AddedReaction {
                channel: channel.to_owned(),
                timestamp: timestamp.to_owned(),
                reaction: reaction.to_owned(),
            });
        }
        Ok(())
    }
}
