// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Bowler
//!
//! Consumer and producer abstraction over RabbitMQ (AMQP 0-9-1) built on `lapin`.
//!
//! A [`Consumer`] declares its [`Topology`] (exchange, queue, bindings and optional
//! dead-lettering), consumes with manual acknowledgment and prefetch 1, and hands
//! deliveries to a [`MessageHandler`]. Broker failures are classified into
//! [`BowlerError`] and reported through an [`ExceptionHandler`].
//!
//! ```ignore
//! let cfg = RabbitMQConfigs::from_env()?;
//! let conn = AmqpConnection::connect(&cfg, &ExceptionTranslator::default()).await?;
//!
//! let topology = Topology::new(
//!     ExchangeDefinition::new("orders").topic().durable(),
//!     QueueDefinition::new("orders.created").durable(),
//! )
//! .binding("order.created.*");
//!
//! let mut consumer = Consumer::new(conn.new_channel().await?, topology, Arc::new(TracingExceptionHandler));
//! consumer.listen_to_queue(OrdersHandler::default(), CancellationToken::new()).await?;
//! ```

mod otel;

pub mod broker;
pub mod channel;
pub mod configs;
pub mod consumer;
pub mod dead_letter;
pub mod delivery;
pub mod errors;
pub mod exception;
pub mod exchange;
pub mod handler;
pub mod publisher;
pub mod queue;
pub mod topology;

#[cfg(test)]
mod testing;

pub use broker::BrokerChannel;
pub use channel::AmqpConnection;
pub use configs::RabbitMQConfigs;
pub use consumer::{Consumer, ConsumerHandle, ConsumerState, FailurePolicy, PREFETCH_COUNT};
pub use dead_letter::DeadLetterDefinition;
pub use delivery::{Delivery, Settlement};
pub use errors::{BowlerError, DeclarationParameters, ErrorKind, HandlerError};
pub use exception::{ExceptionHandler, ExceptionTranslator, TracingExceptionHandler};
pub use exchange::{ExchangeDefinition, ExchangeKind};
pub use handler::MessageHandler;
pub use publisher::{DeliveryMode, Producer};
pub use queue::{QueueBinding, QueueDefinition};
pub use topology::Topology;
pub use tokio_util::sync::CancellationToken;
