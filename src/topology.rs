// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Declaration
//!
//! A [`Topology`] is the exchange, queue and bindings a consumer needs before it can
//! start consuming, plus the optional dead-letter exchange/queue pair. Declaring it
//! is idempotent: re-declaring with identical parameters is accepted by the broker.
//!
//! Declaration failures are never swallowed. They are classified by the
//! [`ExceptionTranslator`] with the full parameter set and queue arguments attached,
//! and returned to the caller.

use crate::{
    broker::BrokerChannel,
    dead_letter::DeadLetterDefinition,
    errors::{BowlerError, DeclarationParameters},
    exception::ExceptionTranslator,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
};
use lapin::types::FieldTable;
use serde_json::Value;
use tracing::{debug, error};

/// Exchange, queue and binding keys declared together before consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub(crate) exchange: ExchangeDefinition,
    pub(crate) queue: QueueDefinition,
    pub(crate) routing_keys: Vec<String>,
}

impl Topology {
    /// Creates a topology binding `queue` to `exchange`.
    ///
    /// An exchange with an empty name is the broker's default exchange: it is never
    /// declared and the queue is not bound to it.
    pub fn new(exchange: ExchangeDefinition, queue: QueueDefinition) -> Topology {
        Topology {
            exchange,
            queue,
            routing_keys: vec![],
        }
    }

    /// Adds a binding of the queue to the exchange under `key`.
    ///
    /// Without any binding the queue is bound once with an empty routing key.
    pub fn binding(mut self, key: &str) -> Self {
        self.routing_keys.push(key.to_owned());
        self
    }

    pub fn bindings<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routing_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn exchange(&self) -> &ExchangeDefinition {
        &self.exchange
    }

    pub fn queue(&self) -> &QueueDefinition {
        &self.queue
    }

    /// Every parameter of this declaration, as attached to declaration errors.
    pub fn parameters(&self) -> DeclarationParameters {
        let mut params = self.exchange.parameters();
        for (key, value) in self.queue.parameters().iter() {
            params = params.with(key, value.clone());
        }

        params.with(
            "binding_keys",
            Value::from(self.routing_keys.clone()),
        )
    }

    /// Arguments sent with the queue declaration.
    pub fn arguments(&self) -> FieldTable {
        self.queue.arguments()
    }

    /// Declares exchange, dead-letter wiring, queue and bindings in that order.
    ///
    /// Returns the effective queue name, which is broker-generated when the queue
    /// definition has an empty name.
    pub async fn declare(
        &self,
        channel: &dyn BrokerChannel,
        translator: &ExceptionTranslator,
    ) -> Result<String, BowlerError> {
        self.declare_exchange(channel, translator, &self.exchange)
            .await?;

        if let Some(dead_letter) = &self.queue.dead_letter {
            if dead_letter.exchange_name().is_empty() {
                let err = BowlerError::invalid_setup(
                    "dead letter exchange name must not be empty",
                    self.parameters(),
                    self.arguments(),
                );
                translator.report(&err);
                return Err(err);
            }

            let dead_letter_keys = match self.dead_letter_binding_keys(dead_letter) {
                Some(keys) => keys,
                None => {
                    let err = BowlerError::invalid_setup(
                        "direct dead letter exchange needs a dead letter routing key",
                        self.parameters(),
                        self.arguments(),
                    );
                    translator.report(&err);
                    return Err(err);
                }
            };

            self.declare_exchange(channel, translator, &dead_letter.exchange)
                .await?;

            let dead_letter_queue = QueueDefinition {
                name: dead_letter.queue_name.clone(),
                durable: self.queue.durable,
                ..Default::default()
            };
            let dlq_name = self
                .declare_queue(channel, translator, &dead_letter_queue, FieldTable::default())
                .await?;

            for key in &dead_letter_keys {
                let binding = QueueBinding::new(&dlq_name)
                    .exchange(dead_letter.exchange_name())
                    .routing_key(key);
                self.bind(channel, translator, &binding).await?;
            }
        }

        let queue_name = self
            .declare_queue(channel, translator, &self.queue, self.arguments())
            .await?;

        if self.exchange.is_default() {
            debug!(queue = queue_name, "default exchange, skipping bindings");
            return Ok(queue_name);
        }

        let bindings: Vec<QueueBinding> = if self.routing_keys.is_empty() {
            vec![QueueBinding::new(&queue_name).exchange(self.exchange.name())]
        } else {
            self.routing_keys
                .iter()
                .map(|key| {
                    QueueBinding::new(&queue_name)
                        .exchange(self.exchange.name())
                        .routing_key(key)
                })
                .collect()
        };

        for binding in &bindings {
            self.bind(channel, translator, binding).await?;
        }

        Ok(queue_name)
    }

    /// Keys binding the dead-letter queue to its exchange.
    ///
    /// Dead letters keep their original routing key unless the definition overrides
    /// it, so a direct dead-letter exchange can only reuse the main keys when those
    /// are exact keys too. `None` when no key can match.
    fn dead_letter_binding_keys(&self, dead_letter: &DeadLetterDefinition) -> Option<Vec<String>> {
        if let Some(key) = &dead_letter.routing_key {
            return Some(vec![key.clone()]);
        }

        match dead_letter.exchange.kind {
            ExchangeKind::Fanout | ExchangeKind::Headers => Some(vec![String::new()]),
            ExchangeKind::Topic => Some(vec!["#".to_owned()]),
            ExchangeKind::Direct if self.exchange.is_default() => {
                if self.queue.name.is_empty() {
                    None
                } else {
                    Some(vec![self.queue.name.clone()])
                }
            }
            ExchangeKind::Direct if self.exchange.kind == ExchangeKind::Direct => {
                if self.routing_keys.is_empty() {
                    Some(vec![String::new()])
                } else {
                    Some(self.routing_keys.clone())
                }
            }
            ExchangeKind::Direct => None,
        }
    }

    async fn declare_exchange(
        &self,
        channel: &dyn BrokerChannel,
        translator: &ExceptionTranslator,
        exchange: &ExchangeDefinition,
    ) -> Result<(), BowlerError> {
        if exchange.is_default() {
            return Ok(());
        }

        debug!("creating exchange: {}", exchange.name);

        match channel
            .exchange_declare(
                &exchange.name,
                exchange.kind,
                exchange.options(),
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = exchange.name,
                    "error to declare the exchange"
                );
                Err(translator.translate(err, self.parameters(), self.arguments()))
            }
            _ => {
                debug!("exchange: {} was created", exchange.name);
                Ok(())
            }
        }
    }

    async fn declare_queue(
        &self,
        channel: &dyn BrokerChannel,
        translator: &ExceptionTranslator,
        queue: &QueueDefinition,
        arguments: FieldTable,
    ) -> Result<String, BowlerError> {
        debug!("creating queue: {}", queue.name);

        match channel
            .queue_declare(&queue.name, queue.options(), arguments)
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = queue.name,
                    "error to declare the queue"
                );
                Err(translator.translate(err, self.parameters(), self.arguments()))
            }
            Ok(name) => {
                debug!("queue: {} was created", name);
                Ok(name)
            }
        }
    }

    async fn bind(
        &self,
        channel: &dyn BrokerChannel,
        translator: &ExceptionTranslator,
        binding: &QueueBinding,
    ) -> Result<(), BowlerError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(translator.translate(err, self.parameters(), self.arguments()))
            }
            _ => Ok(()),
        }
    }
}
