// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! This module provides the builder used to describe a queue declaration, including
//! the queue arguments (message TTL, max length, dead lettering) sent along with it.

use crate::{dead_letter::DeadLetterDefinition, errors::DeclarationParameters};
use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongInt, ShortString},
};

/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Definition of a queue with its configuration parameters.
///
/// By default the queue is transient, non-exclusive and not auto-deleted. An empty
/// name asks the broker to generate one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) passive: bool,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) auto_delete: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
    pub(crate) dead_letter: Option<DeadLetterDefinition>,
}

impl QueueDefinition {
    /// An empty `name` lets the broker generate one.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue passive: the broker only checks that it exists.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Deletes the queue once its last consumer goes away.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Sets the message Time-To-Live in milliseconds.
    ///
    /// Expired messages are dropped, or dead-lettered when dead lettering is set.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Maximum number of ready messages (`x-max-length`).
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Maximum total body size of ready messages (`x-max-length-bytes`).
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    /// Routes rejected and expired messages to a dead-letter exchange.
    pub fn with_dead_letter(mut self, def: DeadLetterDefinition) -> Self {
        self.dead_letter = Some(def);
        self
    }

    pub fn dead_letter(&self) -> Option<&DeadLetterDefinition> {
        self.dead_letter.as_ref()
    }

    pub(crate) fn options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: self.passive,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            nowait: false,
        }
    }

    /// Queue-declare arguments, dead-letter directives included.
    pub fn arguments(&self) -> FieldTable {
        let mut args = match &self.dead_letter {
            Some(def) => def.arguments(),
            None => FieldTable::default(),
        };

        let limits = [
            (AMQP_HEADERS_MESSAGE_TTL, self.ttl),
            (AMQP_HEADERS_MAX_LENGTH, self.max_length),
            (AMQP_HEADERS_MAX_LENGTH_BYTES, self.max_length_bytes),
        ];

        for (key, value) in limits {
            if let Some(value) = value {
                args.insert(
                    ShortString::from(key),
                    AMQPValue::LongInt(LongInt::from(value)),
                );
            }
        }

        args
    }

    pub(crate) fn parameters(&self) -> DeclarationParameters {
        let params = DeclarationParameters::new()
            .with("queue_name", self.name.as_str())
            .with("queue_passive", self.passive)
            .with("queue_durable", self.durable)
            .with("queue_exclusive", self.exclusive)
            .with("queue_auto_delete", self.auto_delete);

        match &self.dead_letter {
            Some(def) => params
                .with("dead_letter_exchange", def.exchange_name())
                .with("dead_letter_queue", def.queue_name())
                .with(
                    "dead_letter_routing_key",
                    def.routing_key.clone().unwrap_or_default(),
                ),
            None => params,
        }
    }
}

/// Binding of a queue to an exchange under a routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding for `queue` with an empty exchange name and routing key.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            ..Default::default()
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}
