// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumer
//!
//! The consumption loop: declare the topology, limit the channel to one
//! unacknowledged delivery, register a manual-ack consumer and hand each delivery to
//! the application's [`MessageHandler`].
//!
//! A successful handler call acknowledges the delivery exactly once, unless the
//! handler already settled it through its [`ConsumerHandle`]. A failing one never
//! acknowledges it: the error is reported and rendered, the handler's recovery hook
//! runs, and if the hook did not try to settle the delivery the [`FailurePolicy`]
//! decides what happens to it. The loop keeps going either way.

use crate::{
    broker::BrokerChannel,
    delivery::Delivery,
    errors::{BowlerError, DeclarationParameters},
    exception::{ExceptionHandler, ExceptionTranslator},
    handler::MessageHandler,
    otel,
    topology::Topology,
};
use futures_util::StreamExt;
use lapin::{options::BasicConsumeOptions, types::FieldTable};
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// At most one unacknowledged delivery per consumer.
pub const PREFETCH_COUNT: u16 = 1;

/// Lifecycle of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Declared,
    Consuming,
    Stopped,
}

/// What to do with a delivery whose handler failed and whose recovery hook did not
/// try to settle it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Leave it unacknowledged. The broker redelivers it once the channel or
    /// consumer goes away.
    #[default]
    LeaveUnacknowledged,
    Nack {
        requeue: bool,
    },
    Reject {
        requeue: bool,
    },
}

/// Handle given to the application to settle deliveries and stop the consumer.
#[derive(Clone)]
pub struct ConsumerHandle {
    queue: String,
    consumer_tag: String,
    translator: ExceptionTranslator,
    shutdown: CancellationToken,
}

impl ConsumerHandle {
    /// Effective name of the consumed queue, broker-generated for anonymous queues.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Acknowledges the delivery (and every earlier one on the channel if `multiple`).
    pub async fn ack_message(&self, delivery: &Delivery, multiple: bool) -> Result<(), BowlerError> {
        delivery.ack(multiple).await.map_err(|err| {
            error!(
                error = err.to_string(),
                delivery_tag = delivery.delivery_tag,
                "error whiling ack msg"
            );
            self.translator.translate_for_delivery(err, delivery)
        })
    }

    /// Negatively acknowledges the delivery.
    ///
    /// # Parameters
    /// * `delivery` - The delivery to settle
    /// * `multiple` - Also nack every earlier unsettled delivery on the channel
    /// * `requeue` - Put it back on the queue instead of dead-lettering or dropping it
    ///
    /// # Returns
    /// `Ok(())` on success, or the classified failure after it went through the
    /// queue hooks
    pub async fn nack_message(
        &self,
        delivery: &Delivery,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), BowlerError> {
        delivery.nack(multiple, requeue).await.map_err(|err| {
            error!(
                error = err.to_string(),
                delivery_tag = delivery.delivery_tag,
                "error whiling nack msg"
            );
            self.translator.translate_for_delivery(err, delivery)
        })
    }

    /// Rejects the delivery. Without `requeue` it goes to the dead-letter exchange, if
    /// the queue has one.
    pub async fn reject_message(&self, delivery: &Delivery, requeue: bool) -> Result<(), BowlerError> {
        delivery.reject(requeue).await.map_err(|err| {
            error!(
                error = err.to_string(),
                delivery_tag = delivery.delivery_tag,
                "error whiling reject msg"
            );
            self.translator.translate_for_delivery(err, delivery)
        })
    }

    /// Stops the consumption loop after the current delivery.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }
}

/// Consumes one queue on its own channel and dispatches deliveries to a
/// [`MessageHandler`].
pub struct Consumer {
    channel: Arc<dyn BrokerChannel>,
    topology: Topology,
    translator: ExceptionTranslator,
    consumer_tag: String,
    failure_policy: FailurePolicy,
    state: ConsumerState,
}

impl Consumer {
    /// Creates a consumer owning `channel`. Each consumer needs its own channel.
    pub fn new(
        channel: Arc<dyn BrokerChannel>,
        topology: Topology,
        exception_handler: Arc<dyn ExceptionHandler>,
    ) -> Consumer {
        Consumer {
            channel,
            topology,
            translator: ExceptionTranslator::new(exception_handler),
            consumer_tag: format!("bowler-{}", Uuid::new_v4()),
            failure_policy: FailurePolicy::default(),
            state: ConsumerState::Idle,
        }
    }

    /// Replaces the generated `bowler-<uuid>` consumer tag.
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }

    /// What to do with failed deliveries the recovery hook left alone.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Declares the topology and consumes until `shutdown` fires or the broker stops
    /// delivering to this consumer.
    ///
    /// Declaration failures are returned before any consumer is registered.
    pub async fn listen_to_queue<H>(
        &mut self,
        mut handler: H,
        shutdown: CancellationToken,
    ) -> Result<(), BowlerError>
    where
        H: MessageHandler,
    {
        let queue = self
            .topology
            .declare(self.channel.as_ref(), &self.translator)
            .await?;
        self.state = ConsumerState::Declared;

        if let Err(err) = self.channel.basic_qos(0, PREFETCH_COUNT, false).await {
            error!(error = err.to_string(), "failure to configure qos");
            return Err(self.translator.translate(
                err,
                self.topology.parameters(),
                FieldTable::default(),
            ));
        }

        let consumer = ConsumerHandle {
            queue: queue.clone(),
            consumer_tag: self.consumer_tag.clone(),
            translator: self.translator.clone(),
            shutdown: shutdown.clone(),
        };
        handler.set_consumer(consumer.clone());

        let mut deliveries = match self
            .channel
            .basic_consume(
                &queue,
                &self.consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(self.translator.translate(
                    err,
                    self.topology
                        .parameters()
                        .with("consumer_tag", self.consumer_tag.as_str()),
                    FieldTable::default(),
                ))
            }
            Ok(stream) => Ok(stream),
        }?;

        self.state = ConsumerState::Consuming;
        info!(queue = queue.as_str(), consumer_tag = %self.consumer_tag, "waiting for messages");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(consumer_tag = %self.consumer_tag, "cancelling consumer");
                    if let Err(err) = self.channel.basic_cancel(&self.consumer_tag).await {
                        error!(error = err.to_string(), "failure to cancel consumer");
                        self.translator.translate(
                            err,
                            DeclarationParameters::new().with("consumer_tag", self.consumer_tag.as_str()),
                            FieldTable::default(),
                        );
                    }
                    break;
                }

                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => self.handle_delivery(&handler, &consumer, delivery).await,
                    Some(Err(err)) => {
                        error!(error = err.to_string(), "errors consume msg");
                        self.translator.translate(
                            err,
                            DeclarationParameters::new().with("queue_name", queue.as_str()),
                            FieldTable::default(),
                        );
                    }
                    None => {
                        debug!(consumer_tag = %self.consumer_tag, "no active consumer left");
                        break;
                    }
                },
            }
        }

        self.state = ConsumerState::Stopped;
        info!(queue = queue.as_str(), "consumer stopped");

        Ok(())
    }

    async fn handle_delivery<H>(&self, handler: &H, consumer: &ConsumerHandle, delivery: Delivery)
    where
        H: MessageHandler,
    {
        let mut span = otel::new_span(
            &delivery.properties,
            &global::tracer("amqp consumer"),
            &delivery.routing_key,
        );

        debug!(
            "received: {} - exchange: {}",
            delivery.routing_key, delivery.exchange,
        );

        let err = match handler.handle(&delivery).await {
            Ok(()) if delivery.settlement_attempted() => {
                debug!(
                    delivery_tag = delivery.delivery_tag,
                    settlement = ?delivery.settlement(),
                    "message settled by handler"
                );
                span.set_status(Status::Ok);
                return;
            }
            Ok(()) => {
                debug!("message successfully processed");
                match consumer.ack_message(&delivery, false).await {
                    Ok(()) => span.set_status(Status::Ok),
                    Err(err) => {
                        span.record_error(&err);
                        span.set_status(Status::Error {
                            description: Cow::from("error to ack msg"),
                        });
                    }
                }
                return;
            }
            Err(err) => err,
        };

        warn!(
            error = err.to_string(),
            delivery_tag = delivery.delivery_tag,
            "error whiling handling msg"
        );
        span.record_error(err.as_ref());
        span.set_status(Status::Error {
            description: Cow::from("handler failure"),
        });

        self.translator.report_handler_error(err.as_ref(), &delivery);
        handler.handle_error(&err, &delivery).await;

        if delivery.settlement_attempted() {
            if !delivery.is_settled() {
                debug!(
                    delivery_tag = delivery.delivery_tag,
                    "settlement by recovery hook failed, skipping failure policy"
                );
            }
            return;
        }

        let settled = match self.failure_policy {
            FailurePolicy::LeaveUnacknowledged => {
                debug!(
                    delivery_tag = delivery.delivery_tag,
                    "leaving msg unacknowledged"
                );
                Ok(())
            }
            FailurePolicy::Nack { requeue } => {
                consumer.nack_message(&delivery, false, requeue).await
            }
            FailurePolicy::Reject { requeue } => consumer.reject_message(&delivery, requeue).await,
        };

        if let Err(err) = settled {
            error!(
                error = err.to_string(),
                delivery_tag = delivery.delivery_tag,
                policy = ?self.failure_policy,
                "failure policy could not settle msg"
            );
            span.record_error(&err);
        }
    }
}
