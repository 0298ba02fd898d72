//! # Channel Commands
//!
//! Decoded client frames and the replies the handler produces for them.

use crate::domain::FieldTable;
use serde::{Deserialize, Serialize};

/// A decoded client command on one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChannelCommand {
    Consume {
        queue: String,
        /// Empty asks the broker to generate one.
        consumer_tag: String,
        auto_ack: bool,
        arguments: FieldTable,
    },
    Publish {
        queue: String,
        payload: Vec<u8>,
    },
    Get {
        queue: String,
        auto_ack: bool,
    },
    Ack {
        delivery_tag: u64,
        multiple: bool,
    },
    Nack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
    Reject {
        delivery_tag: u64,
        requeue: bool,
    },
    Recover,
    Cancel {
        consumer_tag: String,
    },
    Close,
}

impl ChannelCommand {
    /// Frame name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Consume { .. } => "basic.consume",
            Self::Publish { .. } => "basic.publish",
            Self::Get { .. } => "basic.get",
            Self::Ack { .. } => "basic.ack",
            Self::Nack { .. } => "basic.nack",
            Self::Reject { .. } => "basic.reject",
            Self::Recover => "basic.recover",
            Self::Cancel { .. } => "basic.cancel",
            Self::Close => "channel.close",
        }
    }
}

/// Reply to a [`ChannelCommand`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelReply {
    ConsumeOk {
        consumer_tag: String,
    },
    Published {
        message_id: u64,
    },
    GetOk {
        delivery_tag: u64,
        message_id: u64,
        payload: Vec<u8>,
        redelivered: bool,
        message_count: usize,
    },
    GetEmpty,
    /// Ack, nack or reject completed.
    Settled {
        count: usize,
    },
    RecoverOk {
        requeued: usize,
    },
    CancelOk {
        consumer_tag: String,
        requeued: usize,
    },
    CloseOk,
    /// The channel was closed by the broker.
    Closed {
        reply_code: u16,
        reply_text: String,
    },
}
