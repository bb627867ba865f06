// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exception Reporting
//!
//! [`ExceptionHandler`] is the application's reporting hook (logging, alerting...).
//! [`ExceptionTranslator`] classifies broker failures into [`BowlerError`] and always
//! reports before it renders.

use crate::{
    delivery::Delivery,
    errors::{BowlerError, DeclarationParameters, ErrorScope},
};
use lapin::types::FieldTable;
use std::{error::Error, sync::Arc};
use tracing::{debug, error};

/// Application hook receiving every error Bowler surfaces.
///
/// `report_*` is always called before the matching `render_*`.
pub trait ExceptionHandler: Send + Sync {
    fn report_error(&self, err: &(dyn Error + Send + Sync + 'static), delivery: Option<&Delivery>);

    fn render_error(&self, err: &(dyn Error + Send + Sync + 'static), delivery: Option<&Delivery>);

    /// Broker failure while settling a specific delivery.
    fn report_queue(&self, err: &BowlerError, delivery: &Delivery) {
        self.report_error(err, Some(delivery));
    }

    fn render_queue(&self, err: &BowlerError, delivery: &Delivery) {
        self.render_error(err, Some(delivery));
    }
}

/// Default handler writing reports to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExceptionHandler;

impl ExceptionHandler for TracingExceptionHandler {
    fn report_error(&self, err: &(dyn Error + Send + Sync + 'static), delivery: Option<&Delivery>) {
        match err.downcast_ref::<BowlerError>() {
            Some(bowler) => error!(
                error = bowler.to_string(),
                kind = bowler.kind().to_string(),
                code = bowler.code(),
                file = bowler.location().file(),
                line = bowler.location().line(),
                parameters = serde_json::to_string(bowler.parameters()).unwrap_or_default(),
                arguments = format!("{:?}", bowler.arguments()),
                delivery_tag = delivery.map(|d| d.delivery_tag),
                "broker failure"
            ),
            None => error!(
                error = err.to_string(),
                delivery_tag = delivery.map(|d| d.delivery_tag),
                routing_key = delivery.map(|d| d.routing_key.as_str()),
                "failure handling message"
            ),
        }
    }

    fn render_error(&self, err: &(dyn Error + Send + Sync + 'static), delivery: Option<&Delivery>) {
        debug!(
            delivery_tag = delivery.map(|d| d.delivery_tag),
            "{}",
            render(err)
        );
    }
}

/// Human readable rendering: classified errors with their backtrace, anything else
/// with its chain of sources.
fn render(err: &(dyn Error + 'static)) -> String {
    if let Some(bowler) = err.downcast_ref::<BowlerError>() {
        return format!("{}\n{}", bowler, bowler.backtrace());
    }

    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(&format!("\ncaused by: {}", cause));
        source = cause.source();
    }
    rendered
}

/// Classifies broker failures and forwards them to the [`ExceptionHandler`].
#[derive(Clone)]
pub struct ExceptionTranslator {
    handler: Arc<dyn ExceptionHandler>,
}

impl ExceptionTranslator {
    pub fn new(handler: Arc<dyn ExceptionHandler>) -> ExceptionTranslator {
        ExceptionTranslator { handler }
    }

    pub fn handler(&self) -> &Arc<dyn ExceptionHandler> {
        &self.handler
    }

    /// Classifies a failed channel call, then reports and renders it.
    #[track_caller]
    pub fn translate(
        &self,
        err: lapin::Error,
        parameters: DeclarationParameters,
        arguments: FieldTable,
    ) -> BowlerError {
        let err = BowlerError::classify(err, ErrorScope::Channel, parameters, arguments);
        self.report(&err);
        err
    }

    /// Same as [`translate`](Self::translate) for failures while opening the connection.
    #[track_caller]
    pub fn translate_setup(&self, err: lapin::Error, parameters: DeclarationParameters) -> BowlerError {
        let err = BowlerError::classify(err, ErrorScope::Connection, parameters, FieldTable::default());
        self.report(&err);
        err
    }

    /// Classifies a failure to settle `delivery`, reported through the queue hooks.
    #[track_caller]
    pub fn translate_for_delivery(&self, err: lapin::Error, delivery: &Delivery) -> BowlerError {
        let parameters = DeclarationParameters::new()
            .with("delivery_tag", delivery.delivery_tag)
            .with("exchange", delivery.exchange.as_str())
            .with("routing_key", delivery.routing_key.as_str());

        let err = BowlerError::classify(err, ErrorScope::Channel, parameters, FieldTable::default());
        self.handler.report_queue(&err, delivery);
        self.handler.render_queue(&err, delivery);
        err
    }

    /// Reports and renders an error that was built locally.
    pub fn report(&self, err: &BowlerError) {
        self.handler.report_error(err, None);
        self.handler.render_error(err, None);
    }

    /// Reports and renders an application handler failure.
    pub fn report_handler_error(
        &self,
        err: &(dyn Error + Send + Sync + 'static),
        delivery: &Delivery,
    ) {
        self.handler.report_error(err, Some(delivery));
        self.handler.render_error(err, Some(delivery));
    }
}

impl Default for ExceptionTranslator {
    fn default() -> Self {
        ExceptionTranslator::new(Arc::new(TracingExceptionHandler))
    }
}
