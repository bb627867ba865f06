// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! Applications implement [`MessageHandler`] to process deliveries. Only `handle` is
//! required; `set_consumer` and `handle_error` have no-op defaults so the consumer can
//! always call them.

use crate::{consumer::ConsumerHandle, delivery::Delivery, errors::HandlerError};
use async_trait::async_trait;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called once, before the first delivery, with a handle to settle messages or
    /// cancel the consumer.
    fn set_consumer(&mut self, _consumer: ConsumerHandle) {}

    /// Processes one delivery. `Ok` acknowledges it, unless it was already settled
    /// here through the [`ConsumerHandle`].
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;

    /// Recovery hook invoked after `handle` failed and the error was reported.
    ///
    /// The delivery is not acknowledged at this point. Nack or reject it here through
    /// the [`ConsumerHandle`], otherwise the consumer's failure policy applies. Once a
    /// settlement was attempted here the policy is skipped, even if it failed.
    async fn handle_error(&self, _err: &HandlerError, _delivery: &Delivery) {}
}
