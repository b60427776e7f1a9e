// This file is part of TESSERA.
//
// Copyright (C) 2022 The Tessera Project.
//
// TESSERA is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TESSERA is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TESSERA. If not, see <https://www.gnu.org/licenses/>.

//! Execution event publication.
//!
//! Subscribers are registered by identifier, each carrying an interest mask
//! over the event classes below. Publishing walks the registry once,
//! dropping subscribers whose channels are gone before anything is sent,
//! and fans the message out to the interested survivors from a single
//! delivery task.
//!
//! Closing the receiving side of the subscription channel is an implicit
//! unsubscribe; the entry is reaped on the next publication.

use super::message::{Message, PipelineResponseSender};
use crate::base::serialize::rmp_serialize;
use async_std::task;
use std::collections::HashMap;

bitflags::bitflags! {
    /// Execution event kinds.
    pub struct Event: u8 {
        /// A block has been executed and its result persisted.
        const BLOCK_EXECUTED = 1 << 0;
        /// A chunk data pack has been produced.
        const CHUNK_DATA_PACK = 1 << 1;
        /// A service event has been emitted by a system contract.
        const SERVICE_EVENT = 1 << 2;
    }
}

impl serde::Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.bits)
    }
}

impl<'de> serde::Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = <u8 as serde::Deserialize>::deserialize(deserializer)?;
        Event::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown event bits {:#04x}", bits))
        })
    }
}

/// One registered subscriber.
struct Subscriber {
    /// Event classes the subscriber wants to hear about.
    interest: Event,
    /// How many `Packed` envelopes to wrap notifications in. Mirrors the
    /// nesting the subscription request arrived with.
    pack_level: usize,
    /// Response channel the notifications travel on.
    chan: PipelineResponseSender,
}

/// Wrap a notification the way the subscriber expects it.
fn envelope(msg: &Message, pack_level: usize) -> Message {
    let mut wrapped = msg.clone();
    for _ in 0..pack_level {
        let buf = rmp_serialize(&wrapped).unwrap_or_default();
        wrapped = Message::Packed { buf };
    }
    wrapped
}

/// Execution event subscriber registry.
#[derive(Default)]
pub(crate) struct PubSub {
    subscribers: HashMap<String, Subscriber>,
}

impl PubSub {
    pub fn new() -> Self {
        PubSub::default()
    }

    /// Check if any live subscriber cares about the given event classes.
    pub fn has_subscribers(&self, events: Event) -> bool {
        self.subscribers
            .values()
            .any(|sub| sub.interest.intersects(events))
    }

    /// Register interest in a set of event classes.
    ///
    /// A known identifier widens its existing interest mask and adopts the
    /// latest channel and pack level, so a reconnecting subscriber does not
    /// need to unsubscribe first.
    pub fn subscribe(
        &mut self,
        id: String,
        events: Event,
        pack_level: usize,
        chan: PipelineResponseSender,
    ) {
        debug!("[sub] '{}' wants {:?} (pack-level = {})", id, events, pack_level);
        match self.subscribers.get_mut(&id) {
            Some(sub) => {
                sub.interest |= events;
                sub.pack_level = pack_level;
                sub.chan = chan;
            }
            None => {
                self.subscribers.insert(
                    id,
                    Subscriber {
                        interest: events,
                        pack_level,
                        chan,
                    },
                );
            }
        }
    }

    /// Withdraw interest in a set of event classes. A subscriber whose mask
    /// drains to empty is dropped entirely.
    pub fn unsubscribe(&mut self, id: String, events: Event) {
        if let Some(sub) = self.subscribers.get_mut(&id) {
            sub.interest.remove(events);
            if sub.interest.is_empty() {
                debug!("[sub] '{}' has no interests left, dropping", id);
                self.subscribers.remove(&id);
            }
        }
    }

    /// Publish an event to every interested subscriber.
    ///
    /// Subscribers with a closed channel are reaped before delivery; the
    /// rest are served from one background task, each with the message
    /// wrapped at its own pack level.
    pub fn publish(&mut self, event: Event, msg: Message) {
        self.subscribers.retain(|id, sub| {
            let alive = !sub.chan.is_closed();
            if !alive {
                debug!("[sub] '{}' went away, reaping", id);
            }
            alive
        });

        let targets: Vec<(String, usize, PipelineResponseSender)> = self
            .subscribers
            .iter()
            .filter(|(_, sub)| sub.interest.intersects(event))
            .map(|(id, sub)| (id.clone(), sub.pack_level, sub.chan.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        task::spawn(async move {
            for (id, pack_level, chan) in targets {
                let wrapped = envelope(&msg, pack_level);
                if chan.send(wrapped).await.is_err() {
                    debug!("[sub] undeliverable notification for '{}', closing channel", id);
                    chan.close();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::schema::ExecutionResult, channel, pipeline::message::PipelineResponseReceiver,
    };

    fn result_msg() -> Message {
        Message::GetResultResponse {
            result: ExecutionResult::default(),
        }
    }

    #[test]
    fn interest_masks_are_widened_not_replaced() {
        let mut pubsub = PubSub::new();
        let (sender, _receiver) = channel::simple_channel();

        pubsub.subscribe("foo".to_string(), Event::BLOCK_EXECUTED, 0, sender.clone());
        pubsub.subscribe("foo".to_string(), Event::SERVICE_EVENT, 0, sender);

        assert!(pubsub.has_subscribers(Event::BLOCK_EXECUTED));
        assert!(pubsub.has_subscribers(Event::SERVICE_EVENT));
        assert!(!pubsub.has_subscribers(Event::CHUNK_DATA_PACK));
    }

    #[test]
    fn draining_the_mask_drops_the_subscriber() {
        let mut pubsub = PubSub::new();
        let (sender, _receiver) = channel::simple_channel();
        pubsub.subscribe(
            "foo".to_string(),
            Event::BLOCK_EXECUTED | Event::SERVICE_EVENT,
            0,
            sender,
        );

        pubsub.unsubscribe("foo".to_string(), Event::BLOCK_EXECUTED);
        assert!(!pubsub.has_subscribers(Event::BLOCK_EXECUTED));
        assert!(pubsub.has_subscribers(Event::SERVICE_EVENT));

        pubsub.unsubscribe("foo".to_string(), Event::SERVICE_EVENT);
        assert!(!pubsub.has_subscribers(Event::SERVICE_EVENT));
    }

    #[test]
    fn notification_reaches_the_interested_subscriber() {
        let mut pubsub = PubSub::new();
        let (sender, receiver) = channel::simple_channel();
        pubsub.subscribe("foo".to_string(), Event::BLOCK_EXECUTED, 0, sender);

        pubsub.publish(Event::BLOCK_EXECUTED, result_msg());

        let msg = receiver.recv_sync().unwrap();
        assert_eq!(msg, result_msg());
    }

    #[test]
    fn uninterested_subscriber_is_skipped() {
        let mut pubsub = PubSub::new();
        let (sender, receiver) = channel::simple_channel();
        pubsub.subscribe("foo".to_string(), Event::CHUNK_DATA_PACK, 0, sender);

        pubsub.publish(Event::BLOCK_EXECUTED, result_msg());

        let err = receiver
            .recv_timeout_sync(std::time::Duration::from_millis(300))
            .unwrap_err();
        assert_eq!(err, channel::ChannelError::RecvTimeout);
    }

    #[test]
    fn packed_notification_for_packed_subscriber() {
        let mut pubsub = PubSub::new();
        let (sender, receiver) = channel::simple_channel();
        pubsub.subscribe("foo".to_string(), Event::BLOCK_EXECUTED, 2, sender);

        pubsub.publish(Event::BLOCK_EXECUTED, result_msg());

        // Two envelopes around the original notification.
        let msg = receiver.recv_sync().unwrap();
        let inner = match msg {
            Message::Packed { buf } => crate::base::serialize::rmp_deserialize::<Message>(&buf)
                .unwrap(),
            other => panic!("unexpected: {:?}", other),
        };
        let innermost = match inner {
            Message::Packed { buf } => crate::base::serialize::rmp_deserialize::<Message>(&buf)
                .unwrap(),
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(innermost, result_msg());
    }

    fn subscribe_with_channel(pubsub: &mut PubSub, id: &str) -> PipelineResponseReceiver {
        let (sender, receiver) = channel::simple_channel();
        pubsub.subscribe(id.to_string(), Event::BLOCK_EXECUTED, 0, sender);
        receiver
    }

    #[test]
    fn closed_channel_is_reaped_before_delivery() {
        let mut pubsub = PubSub::new();
        let receiver = subscribe_with_channel(&mut pubsub, "foo");
        drop(receiver);
        assert!(pubsub.has_subscribers(Event::BLOCK_EXECUTED));

        // The reap happens on publication, ahead of any send attempt.
        pubsub.publish(Event::BLOCK_EXECUTED, result_msg());

        assert!(!pubsub.has_subscribers(Event::BLOCK_EXECUTED));
    }
}
