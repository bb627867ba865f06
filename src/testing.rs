// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker and recording hooks shared by the unit tests.

use crate::{
    broker::{BrokerChannel, DeliveryStream},
    delivery::Delivery,
    errors::BowlerError,
    exception::ExceptionHandler,
    exchange::ExchangeKind,
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    protocol::{AMQPError, AMQPErrorKind, AMQPHardError, AMQPSoftError},
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use std::{
    collections::HashMap,
    error::Error,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use uuid::Uuid;

pub(crate) fn soft_error(kind: AMQPSoftError) -> lapin::Error {
    lapin::Error::ProtocolError(AMQPError::new(
        AMQPErrorKind::Soft(kind),
        ShortString::from("channel closed by broker"),
    ))
}

pub(crate) fn hard_error(kind: AMQPHardError) -> lapin::Error {
    lapin::Error::ProtocolError(AMQPError::new(
        AMQPErrorKind::Hard(kind),
        ShortString::from("connection closed by broker"),
    ))
}

pub(crate) fn test_delivery(
    broker: &Arc<FakeBroker>,
    tag: u64,
    routing_key: &str,
    data: &[u8],
) -> Delivery {
    Delivery::new(
        tag,
        "orders",
        routing_key,
        false,
        BasicProperties::default(),
        data.to_vec(),
        broker.clone(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BrokerCall {
    ExchangeDeclare {
        name: String,
        kind: ExchangeKind,
        durable: bool,
    },
    QueueDeclare {
        name: String,
        durable: bool,
    },
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    Qos {
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    },
    Consume {
        queue: String,
        consumer_tag: String,
        no_ack: bool,
    },
    Cancel {
        consumer_tag: String,
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
    Publish {
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
        delivery_mode: Option<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct DeclaredQueue {
    durable: bool,
    exclusive: bool,
    auto_delete: bool,
    arguments: FieldTable,
}

/// Broker double that keeps declared state, so conflicting re-declarations fail the
/// way RabbitMQ does (406 PRECONDITION_FAILED, 404 NOT_FOUND for passive checks).
#[derive(Default)]
pub(crate) struct FakeBroker {
    calls: Mutex<Vec<BrokerCall>>,
    exchanges: Mutex<HashMap<String, (ExchangeKind, ExchangeDeclareOptions)>>,
    queues: Mutex<HashMap<String, DeclaredQueue>>,
    staged: Mutex<Vec<Delivery>>,
    hold_open: AtomicBool,
    fail_acks: AtomicBool,
    fail_rejects: AtomicBool,
}

impl FakeBroker {
    pub(crate) fn new() -> Arc<FakeBroker> {
        Arc::new(FakeBroker::default())
    }

    pub(crate) fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Acknowledgment-related calls (ack, nack, reject) only.
    pub(crate) fn settlements(&self) -> Vec<BrokerCall> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    BrokerCall::Ack { .. } | BrokerCall::Nack { .. } | BrokerCall::Reject { .. }
                )
            })
            .collect()
    }

    /// Queues a delivery for the next consumer registration.
    pub(crate) fn stage(&self, delivery: Delivery) {
        self.staged.lock().unwrap().push(delivery);
    }

    /// Keeps the delivery stream open after the staged deliveries instead of ending it.
    pub(crate) fn hold_consumer_open(&self) {
        self.hold_open.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_acks(&self) {
        self.fail_acks.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_rejects(&self) {
        self.fail_rejects.store(true, Ordering::SeqCst);
    }

    pub(crate) fn queue_has_dead_letter_exchange(&self, queue: &str, exchange: &str) -> bool {
        let queues = self.queues.lock().unwrap();
        match queues
            .get(queue)
            .and_then(|q| q.arguments.inner().get("x-dead-letter-exchange").cloned())
        {
            Some(AMQPValue::LongString(value)) => value.as_bytes() == exchange.as_bytes(),
            _ => false,
        }
    }

    fn record(&self, call: BrokerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BrokerChannel for FakeBroker {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        _arguments: FieldTable,
    ) -> Result<(), lapin::Error> {
        self.record(BrokerCall::ExchangeDeclare {
            name: exchange.to_owned(),
            kind,
            durable: options.durable,
        });

        let mut exchanges = self.exchanges.lock().unwrap();
        match exchanges.get(exchange) {
            Some(_) if options.passive => Ok(()),
            None if options.passive => Err(soft_error(AMQPSoftError::NOTFOUND)),
            Some((existing_kind, existing)) => {
                if *existing_kind != kind
                    || existing.durable != options.durable
                    || existing.auto_delete != options.auto_delete
                {
                    return Err(soft_error(AMQPSoftError::PRECONDITIONFAILED));
                }
                Ok(())
            }
            None => {
                exchanges.insert(exchange.to_owned(), (kind, options));
                Ok(())
            }
        }
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<String, lapin::Error> {
        self.record(BrokerCall::QueueDeclare {
            name: queue.to_owned(),
            durable: options.durable,
        });

        let name = if queue.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4())
        } else {
            queue.to_owned()
        };

        let declared = DeclaredQueue {
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            arguments,
        };

        let mut queues = self.queues.lock().unwrap();
        match queues.get(&name) {
            Some(_) if options.passive => Ok(name),
            None if options.passive => Err(soft_error(AMQPSoftError::NOTFOUND)),
            Some(existing) if *existing != declared => {
                Err(soft_error(AMQPSoftError::PRECONDITIONFAILED))
            }
            Some(_) => Ok(name),
            None => {
                queues.insert(name.clone(), declared);
                Ok(name)
            }
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), lapin::Error> {
        self.record(BrokerCall::QueueBind {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        });

        if !self.exchanges.lock().unwrap().contains_key(exchange)
            || !self.queues.lock().unwrap().contains_key(queue)
        {
            return Err(soft_error(AMQPSoftError::NOTFOUND));
        }

        Ok(())
    }

    async fn basic_qos(
        &self,
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    ) -> Result<(), lapin::Error> {
        self.record(BrokerCall::Qos {
            prefetch_size,
            prefetch_count,
            global,
        });
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, lapin::Error> {
        self.record(BrokerCall::Consume {
            queue: queue.to_owned(),
            consumer_tag: consumer_tag.to_owned(),
            no_ack: options.no_ack,
        });

        let staged: Vec<Delivery> = self.staged.lock().unwrap().drain(..).collect();
        let deliveries = stream::iter(staged.into_iter().map(Ok));

        if self.hold_open.load(Ordering::SeqCst) {
            Ok(deliveries.chain(stream::pending()).boxed())
        } else {
            Ok(deliveries.boxed())
        }
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), lapin::Error> {
        self.record(BrokerCall::Cancel {
            consumer_tag: consumer_tag.to_owned(),
        });
        Ok(())
    }

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), lapin::Error> {
        self.record(BrokerCall::Ack {
            delivery_tag,
            multiple,
        });

        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(lapin::Error::ChannelsLimitReached);
        }
        Ok(())
    }

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), lapin::Error> {
        self.record(BrokerCall::Nack {
            delivery_tag,
            multiple,
            requeue,
        });
        Ok(())
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), lapin::Error> {
        self.record(BrokerCall::Reject {
            delivery_tag,
            requeue,
        });

        if self.fail_rejects.load(Ordering::SeqCst) {
            return Err(lapin::Error::ChannelsLimitReached);
        }
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), lapin::Error> {
        self.record(BrokerCall::Publish {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            payload: payload.to_vec(),
            delivery_mode: *properties.delivery_mode(),
        });

        if !exchange.is_empty() && !self.exchanges.lock().unwrap().contains_key(exchange) {
            return Err(soft_error(AMQPSoftError::NOTFOUND));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HookCall {
    Report { delivery_tag: Option<u64> },
    Render { delivery_tag: Option<u64> },
    ReportQueue { delivery_tag: u64 },
    RenderQueue { delivery_tag: u64 },
}

/// Exception handler remembering the order hooks were called in.
#[derive(Default)]
pub(crate) struct RecordingExceptionHandler {
    calls: Mutex<Vec<HookCall>>,
    messages: Mutex<Vec<String>>,
}

impl RecordingExceptionHandler {
    pub(crate) fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Display text of every reported error.
    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ExceptionHandler for RecordingExceptionHandler {
    fn report_error(&self, err: &(dyn Error + Send + Sync + 'static), delivery: Option<&Delivery>) {
        self.messages.lock().unwrap().push(err.to_string());
        self.calls.lock().unwrap().push(HookCall::Report {
            delivery_tag: delivery.map(|d| d.delivery_tag),
        });
    }

    fn render_error(&self, _err: &(dyn Error + Send + Sync + 'static), delivery: Option<&Delivery>) {
        self.calls.lock().unwrap().push(HookCall::Render {
            delivery_tag: delivery.map(|d| d.delivery_tag),
        });
    }

    fn report_queue(&self, err: &BowlerError, delivery: &Delivery) {
        self.messages.lock().unwrap().push(err.to_string());
        self.calls.lock().unwrap().push(HookCall::ReportQueue {
            delivery_tag: delivery.delivery_tag,
        });
    }

    fn render_queue(&self, _err: &BowlerError, delivery: &Delivery) {
        self.calls.lock().unwrap().push(HookCall::RenderQueue {
            delivery_tag: delivery.delivery_tag,
        });
    }
}
