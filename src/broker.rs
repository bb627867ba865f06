// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Channel Capability
//!
//! The consumer, producer and topology declarator only talk to the broker through
//! the [`BrokerChannel`] trait. `lapin::Channel` is the production implementation;
//! tests plug in mocks or the in-crate fake broker.

use crate::{delivery::Delivery, exchange::ExchangeKind};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, BasicRejectOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel,
};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Stream of inbound deliveries for one registered consumer.
///
/// The stream ends when the broker no longer has the consumer registered.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, lapin::Error>>;

/// The subset of AMQP channel operations Bowler relies on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), lapin::Error>;

    /// Declares a queue and returns its effective name.
    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<String, lapin::Error>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), lapin::Error>;

    async fn basic_qos(
        &self,
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    ) -> Result<(), lapin::Error>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, lapin::Error>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), lapin::Error>;

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), lapin::Error>;

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), lapin::Error>;

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), lapin::Error>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), lapin::Error>;
}

#[async_trait]
impl BrokerChannel for Channel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), lapin::Error> {
        Channel::exchange_declare(self, exchange, kind.into(), options, arguments).await
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<String, lapin::Error> {
        let queue = Channel::queue_declare(self, queue, options, arguments).await?;
        Ok(queue.name().to_string())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), lapin::Error> {
        Channel::queue_bind(
            self,
            queue,
            exchange,
            routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    }

    /// lapin does not expose `prefetch_size`, the broker treats it as 0 (no limit) anyway.
    async fn basic_qos(
        &self,
        _prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    ) -> Result<(), lapin::Error> {
        Channel::basic_qos(self, prefetch_count, BasicQosOptions { global }).await
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, lapin::Error> {
        let consumer =
            Channel::basic_consume(self, queue, consumer_tag, options, FieldTable::default())
                .await?;

        let channel: Arc<dyn BrokerChannel> = Arc::new(self.clone());

        Ok(consumer
            .map(move |result| {
                result.map(|delivery| {
                    Delivery::new(
                        delivery.delivery_tag,
                        delivery.exchange.as_str(),
                        delivery.routing_key.as_str(),
                        delivery.redelivered,
                        delivery.properties,
                        delivery.data,
                        channel.clone(),
                    )
                })
            })
            .boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), lapin::Error> {
        Channel::basic_cancel(self, consumer_tag, BasicCancelOptions { nowait: false }).await
    }

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), lapin::Error> {
        Channel::basic_ack(self, delivery_tag, BasicAckOptions { multiple }).await
    }

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), lapin::Error> {
        Channel::basic_nack(self, delivery_tag, BasicNackOptions { multiple, requeue }).await
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), lapin::Error> {
        Channel::basic_reject(self, delivery_tag, BasicRejectOptions { requeue }).await
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), lapin::Error> {
        Channel::basic_publish(
            self,
            exchange,
            routing_key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            payload,
            properties,
        )
        .await?;

        Ok(())
    }
}
