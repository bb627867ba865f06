// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Inbound Deliveries
//!
//! A [`Delivery`] is one message handed to the consumer, together with the channel
//! that delivered it. Settlement (ack/nack/reject) always goes back through that
//! channel using the delivery tag.

use crate::broker::BrokerChannel;
use lapin::BasicProperties;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
};

/// Terminal state reached by a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Unsettled,
    Acked,
    Nacked,
    Rejected,
}

impl Settlement {
    fn from_u8(value: u8) -> Settlement {
        match value {
            1 => Settlement::Acked,
            2 => Settlement::Nacked,
            3 => Settlement::Rejected,
            _ => Settlement::Unsettled,
        }
    }
}

/// One message received by a consumer.
///
/// Only the consumer and its [`ConsumerHandle`](crate::consumer::ConsumerHandle) can
/// settle it, and the first settlement attempt is final.
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    channel: Arc<dyn BrokerChannel>,
    settlement: AtomicU8,
    attempted: AtomicBool,
}

impl Delivery {
    /// Builds a delivery received on `channel`. Implementations of
    /// [`BrokerChannel`] call this when mapping their own delivery type.
    pub fn new(
        delivery_tag: u64,
        exchange: &str,
        routing_key: &str,
        redelivered: bool,
        properties: BasicProperties,
        data: Vec<u8>,
        channel: Arc<dyn BrokerChannel>,
    ) -> Delivery {
        Delivery {
            delivery_tag,
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            redelivered,
            properties,
            data,
            channel,
            settlement: AtomicU8::new(0),
            attempted: AtomicBool::new(false),
        }
    }

    /// The channel this delivery arrived on.
    pub fn channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.channel
    }

    /// Settlement confirmed by the channel so far.
    pub fn settlement(&self) -> Settlement {
        Settlement::from_u8(self.settlement.load(Ordering::Acquire))
    }

    pub fn is_settled(&self) -> bool {
        self.settlement() != Settlement::Unsettled
    }

    /// Whether an ack, nack or reject was sent for this delivery, successful or not.
    ///
    /// A failed settlement leaves the delivery [`Settlement::Unsettled`] but usually
    /// means the channel is gone, so nothing should try again on it.
    pub fn settlement_attempted(&self) -> bool {
        self.attempted.load(Ordering::Acquire)
    }

    pub(crate) async fn ack(&self, multiple: bool) -> Result<(), lapin::Error> {
        self.attempted.store(true, Ordering::Release);
        self.channel.basic_ack(self.delivery_tag, multiple).await?;
        self.settle(Settlement::Acked);
        Ok(())
    }

    pub(crate) async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), lapin::Error> {
        self.attempted.store(true, Ordering::Release);
        self.channel
            .basic_nack(self.delivery_tag, multiple, requeue)
            .await?;
        self.settle(Settlement::Nacked);
        Ok(())
    }

    pub(crate) async fn reject(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.attempted.store(true, Ordering::Release);
        self.channel.basic_reject(self.delivery_tag, requeue).await?;
        self.settle(Settlement::Rejected);
        Ok(())
    }

    fn settle(&self, settlement: Settlement) {
        let value = match settlement {
            Settlement::Unsettled => 0,
            Settlement::Acked => 1,
            Settlement::Nacked => 2,
            Settlement::Rejected => 3,
        };
        self.settlement.store(value, Ordering::Release);
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("data_len", &self.data.len())
            .field("settlement", &self.settlement())
            .finish()
    }
}
