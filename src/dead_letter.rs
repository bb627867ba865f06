// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Dead Lettering
//!
//! Queue arguments that make the broker republish rejected, expired or
//! negatively-acknowledged (without requeue) messages to a dead-letter exchange.
//! The redirection itself is performed by the broker; this module only builds the
//! static configuration.

use crate::exchange::{ExchangeDefinition, ExchangeKind};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// Builds the queue-declare arguments routing dead letters to `exchange`.
///
/// When `routing_key` is given it replaces the original routing key of the message
/// while it is dead-lettered.
pub fn with_dead_letter(exchange: &str, routing_key: Option<&str>) -> FieldTable {
    let mut args = FieldTable::default();

    args.insert(
        ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
        AMQPValue::LongString(LongString::from(exchange)),
    );

    if let Some(key) = routing_key {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(key)),
        );
    }

    args
}

/// Dead-letter wiring for a consumed queue.
///
/// Declaring a topology with this definition declares the dead-letter exchange and
/// queue, binds them together and adds [`with_dead_letter`] arguments to the main
/// queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterDefinition {
    pub(crate) exchange: ExchangeDefinition,
    pub(crate) queue_name: String,
    pub(crate) routing_key: Option<String>,
}

impl DeadLetterDefinition {
    /// Dead letters go to `exchange` (a durable fanout by default) and are stored in
    /// `queue`.
    pub fn new(exchange: &str, queue: &str) -> DeadLetterDefinition {
        DeadLetterDefinition {
            exchange: ExchangeDefinition::new(exchange).durable(),
            queue_name: queue.to_owned(),
            routing_key: None,
        }
    }

    /// Type of the dead-letter exchange.
    ///
    /// A direct exchange needs a [`routing_key`](Self::routing_key) unless the main
    /// exchange is direct (or the default exchange) too.
    pub fn exchange_kind(mut self, kind: ExchangeKind) -> Self {
        self.exchange = self.exchange.kind(kind);
        self
    }

    /// Overrides the routing key used when a message is dead-lettered.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = Some(key.to_owned());
        self
    }

    pub fn exchange_name(&self) -> &str {
        self.exchange.name()
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub(crate) fn arguments(&self) -> FieldTable {
        with_dead_letter(self.exchange.name(), self.routing_key.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_string(args: &FieldTable, key: &str) -> Option<String> {
        match args.inner().get(key) {
            Some(AMQPValue::LongString(value)) => {
                Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
            }
            _ => None,
        }
    }

    #[test]
    fn contains_exchange_only_without_routing_key() {
        let args = with_dead_letter("orders.dlx", None);

        assert_eq!(
            long_string(&args, AMQP_HEADERS_DEAD_LETTER_EXCHANGE).as_deref(),
            Some("orders.dlx")
        );
        assert!(args
            .inner()
            .get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY)
            .is_none());
    }

    #[test]
    fn contains_overridden_routing_key() {
        let args = with_dead_letter("orders.dlx", Some("orders.dead"));

        assert_eq!(
            long_string(&args, AMQP_HEADERS_DEAD_LETTER_EXCHANGE).as_deref(),
            Some("orders.dlx")
        );
        assert_eq!(
            long_string(&args, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY).as_deref(),
            Some("orders.dead")
        );
    }

    #[test]
    fn definition_arguments_follow_routing_key() {
        let def = DeadLetterDefinition::new("orders.dlx", "orders.dead-letters")
            .exchange_kind(ExchangeKind::Direct)
            .routing_key("dead");

        let args = def.arguments();
        assert_eq!(
            long_string(&args, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY).as_deref(),
            Some("dead")
        );
        assert_eq!(def.exchange.kind, ExchangeKind::Direct);
        assert!(def.exchange.durable);
    }
}
