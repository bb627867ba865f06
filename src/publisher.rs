// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Producer
//!
//! Publishes payloads to an exchange with a routing key. The current OpenTelemetry
//! context is injected into the message headers so consumers continue the trace.

use crate::{
    broker::BrokerChannel,
    errors::{BowlerError, DeclarationParameters},
    exception::{ExceptionHandler, ExceptionTranslator},
    exchange::ExchangeDefinition,
    otel::RabbitMQTracePropagator,
};
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::{global, Context};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode of published messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent = 1,
    #[default]
    Persistent = 2,
}

/// Publishes messages to a single exchange.
///
/// Messages are persistent JSON by default and carry a fresh message id and the
/// caller's trace context.
pub struct Producer {
    channel: Arc<dyn BrokerChannel>,
    exchange: ExchangeDefinition,
    delivery_mode: DeliveryMode,
    content_type: String,
    translator: ExceptionTranslator,
}

impl Producer {
    /// Creates a new producer.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server
    /// * `exchange` - Exchange every message is published to
    /// * `exception_handler` - Receives publish and declaration failures
    pub fn new(
        channel: Arc<dyn BrokerChannel>,
        exchange: ExchangeDefinition,
        exception_handler: Arc<dyn ExceptionHandler>,
    ) -> Producer {
        Producer {
            channel,
            exchange,
            delivery_mode: DeliveryMode::default(),
            content_type: JSON_CONTENT_TYPE.to_owned(),
            translator: ExceptionTranslator::new(exception_handler),
        }
    }

    /// Persistent (2) by default.
    pub fn delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_owned();
        self
    }

    pub fn exchange(&self) -> &ExchangeDefinition {
        &self.exchange
    }

    /// Declares the producer's exchange. The default exchange is never declared.
    pub async fn setup(&self) -> Result<(), BowlerError> {
        if self.exchange.is_default() {
            return Ok(());
        }

        debug!("creating exchange: {}", self.exchange.name());

        match self
            .channel
            .exchange_declare(
                self.exchange.name(),
                self.exchange.kind,
                self.exchange.options(),
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to declare the exchange");
                Err(self.translator.translate(
                    err,
                    self.exchange.parameters(),
                    FieldTable::default(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Publishes `data` with `routing_key`.
    pub async fn publish(
        &self,
        ctx: &Context,
        routing_key: &str,
        data: &[u8],
    ) -> Result<(), BowlerError> {
        self.publish_with_headers(ctx, routing_key, data, FieldTable::default())
            .await
    }

    /// Publishes `data` with extra application headers. Trace headers win on key
    /// collisions.
    pub async fn publish_with_headers(
        &self,
        ctx: &Context,
        routing_key: &str,
        data: &[u8],
        headers: FieldTable,
    ) -> Result<(), BowlerError> {
        let mut btree: BTreeMap<ShortString, AMQPValue> = headers.inner().clone();

        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(ctx, &mut RabbitMQTracePropagator::new(&mut btree))
        });

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(self.content_type.clone()))
            .with_delivery_mode(self.delivery_mode as u8)
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(FieldTable::from(btree));

        match self
            .channel
            .basic_publish(self.exchange.name(), routing_key, data, properties)
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(self.translator.translate(
                    err,
                    DeclarationParameters::new()
                        .with("exchange_name", self.exchange.name())
                        .with("routing_key", routing_key),
                    FieldTable::default(),
                ))
            }
            _ => Ok(()),
        }
    }
}
