// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for Bowler
//!
//! Every failure surfaced from the broker boundary is classified into one of the
//! three `BowlerError` variants. The variants share the same payload: the original
//! message and reply code, the source location where the failure was classified,
//! a captured backtrace, and the declaration parameters/arguments in effect at
//! the call site.
//!
//! Errors raised by application handlers are not part of this taxonomy, they travel
//! as [`HandlerError`] and are only reported.

use lapin::{
    protocol::AMQPErrorKind,
    types::FieldTable,
};
use serde::Serialize;
use serde_json::Value;
use std::{backtrace::Backtrace, collections::BTreeMap, fmt, panic::Location};
use thiserror::Error;

/// Error type returned by application message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The class a broker failure was mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// A declaration conflicts with the state already held by the broker.
    DeclarationMismatch,
    /// Connection, authorization or negotiation failure, or an invalid local setup.
    InvalidSetup,
    /// Anything else surfaced from the broker boundary.
    BowlerGeneral,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DeclarationMismatch => write!(f, "declaration mismatch"),
            ErrorKind::InvalidSetup => write!(f, "invalid setup"),
            ErrorKind::BowlerGeneral => write!(f, "bowler general"),
        }
    }
}

/// Which side of the protocol a broker call talks to.
///
/// The same AMQP reply code can close either a channel or a connection, so the
/// classification needs to know whether the failing call was a channel operation
/// (declare, bind, publish, ack...) or the connection handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Channel,
    Connection,
}

/// Named parameters of the declaration that failed.
///
/// Always present on a [`BowlerError`]; empty when the failing call had none.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeclarationParameters(BTreeMap<String, Value>);

impl DeclarationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, replacing any previous value under the same key.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Diagnostic payload shared by every [`BowlerError`] variant.
#[derive(Debug)]
pub struct ErrorContext {
    pub message: String,
    /// AMQP reply code, 0 when the failure did not come with one.
    pub code: u16,
    pub location: &'static Location<'static>,
    pub backtrace: Backtrace,
    pub parameters: DeclarationParameters,
    pub arguments: FieldTable,
}

/// Classified failure surfaced from the broker boundary.
#[derive(Error, Debug)]
pub enum BowlerError {
    #[error("declaration mismatch: {}", .context.message)]
    DeclarationMismatch {
        context: Box<ErrorContext>,
        #[source]
        source: Option<lapin::Error>,
    },

    #[error("invalid setup: {}", .context.message)]
    InvalidSetup {
        context: Box<ErrorContext>,
        #[source]
        source: Option<lapin::Error>,
    },

    #[error("bowler error: {}", .context.message)]
    BowlerGeneral {
        context: Box<ErrorContext>,
        #[source]
        source: Option<lapin::Error>,
    },
}

impl BowlerError {
    /// Maps a broker failure onto the error taxonomy.
    ///
    /// First match wins:
    /// 1. soft (channel-level) protocol error on a channel call => `DeclarationMismatch`
    /// 2. hard (connection-level) protocol error, any protocol error while opening the
    ///    connection, version negotiation or connection state failures => `InvalidSetup`
    /// 3. anything else => `BowlerGeneral`
    #[track_caller]
    pub fn classify(
        err: lapin::Error,
        scope: ErrorScope,
        parameters: DeclarationParameters,
        arguments: FieldTable,
    ) -> BowlerError {
        let (kind, code) = match &err {
            lapin::Error::ProtocolError(amqp) => match (amqp.kind(), scope) {
                (AMQPErrorKind::Soft(_), ErrorScope::Channel) => {
                    (ErrorKind::DeclarationMismatch, amqp.get_id())
                }
                _ => (ErrorKind::InvalidSetup, amqp.get_id()),
            },
            lapin::Error::InvalidProtocolVersion(_) | lapin::Error::InvalidConnectionState(_) => {
                (ErrorKind::InvalidSetup, 0)
            }
            _ => (ErrorKind::BowlerGeneral, 0),
        };

        let context = Box::new(ErrorContext {
            message: err.to_string(),
            code,
            location: Location::caller(),
            backtrace: Backtrace::capture(),
            parameters,
            arguments,
        });

        BowlerError::from_parts(kind, context, Some(err))
    }

    /// Builds an `InvalidSetup` error for a local configuration problem.
    #[track_caller]
    pub fn invalid_setup(
        message: &str,
        parameters: DeclarationParameters,
        arguments: FieldTable,
    ) -> BowlerError {
        let context = Box::new(ErrorContext {
            message: message.to_owned(),
            code: 0,
            location: Location::caller(),
            backtrace: Backtrace::capture(),
            parameters,
            arguments,
        });

        BowlerError::from_parts(ErrorKind::InvalidSetup, context, None)
    }

    fn from_parts(
        kind: ErrorKind,
        context: Box<ErrorContext>,
        source: Option<lapin::Error>,
    ) -> BowlerError {
        match kind {
            ErrorKind::DeclarationMismatch => BowlerError::DeclarationMismatch { context, source },
            ErrorKind::InvalidSetup => BowlerError::InvalidSetup { context, source },
            ErrorKind::BowlerGeneral => BowlerError::BowlerGeneral { context, source },
        }
    }

    /// The taxonomy entry, without the payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BowlerError::DeclarationMismatch { .. } => ErrorKind::DeclarationMismatch,
            BowlerError::InvalidSetup { .. } => ErrorKind::InvalidSetup,
            BowlerError::BowlerGeneral { .. } => ErrorKind::BowlerGeneral,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            BowlerError::DeclarationMismatch { context, .. }
            | BowlerError::InvalidSetup { context, .. }
            | BowlerError::BowlerGeneral { context, .. } => context,
        }
    }

    /// The broker error this one was classified from, if any.
    pub fn cause(&self) -> Option<&lapin::Error> {
        match self {
            BowlerError::DeclarationMismatch { source, .. }
            | BowlerError::InvalidSetup { source, .. }
            | BowlerError::BowlerGeneral { source, .. } => source.as_ref(),
        }
    }

    pub fn message(&self) -> &str {
        &self.context().message
    }

    /// AMQP reply code (406, 403, 530...), 0 when the broker did not send one.
    pub fn code(&self) -> u16 {
        self.context().code
    }

    pub fn parameters(&self) -> &DeclarationParameters {
        &self.context().parameters
    }

    pub fn arguments(&self) -> &FieldTable {
        &self.context().arguments
    }

    /// Where in Bowler the error was classified.
    pub fn location(&self) -> &'static Location<'static> {
        self.context().location
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.context().backtrace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hard_error, soft_error};
    use lapin::protocol::{AMQPHardError, AMQPSoftError};

    #[test]
    fn soft_error_on_channel_is_declaration_mismatch() {
        let params = DeclarationParameters::new().with("exchange_name", "orders");

        let err = BowlerError::classify(
            soft_error(AMQPSoftError::PRECONDITIONFAILED),
            ErrorScope::Channel,
            params.clone(),
            FieldTable::default(),
        );

        assert_eq!(err.kind(), ErrorKind::DeclarationMismatch);
        assert_eq!(err.code(), 406);
        assert_eq!(err.parameters(), &params);
        assert!(err.cause().is_some());
        assert!(err.location().file().ends_with("errors.rs"));
    }

    #[test]
    fn hard_error_is_invalid_setup() {
        let err = BowlerError::classify(
            hard_error(AMQPHardError::NOTALLOWED),
            ErrorScope::Channel,
            DeclarationParameters::new(),
            FieldTable::default(),
        );

        assert_eq!(err.kind(), ErrorKind::InvalidSetup);
        assert_eq!(err.code(), 530);
    }

    #[test]
    fn access_refused_while_connecting_is_invalid_setup() {
        let err = BowlerError::classify(
            soft_error(AMQPSoftError::ACCESSREFUSED),
            ErrorScope::Connection,
            DeclarationParameters::new(),
            FieldTable::default(),
        );

        assert_eq!(err.kind(), ErrorKind::InvalidSetup);
        assert_eq!(err.code(), 403);
    }

    #[test]
    fn other_failures_are_general() {
        let err = BowlerError::classify(
            lapin::Error::ChannelsLimitReached,
            ErrorScope::Channel,
            DeclarationParameters::new(),
            FieldTable::default(),
        );

        assert_eq!(err.kind(), ErrorKind::BowlerGeneral);
        assert_eq!(err.code(), 0);
        assert!(err.parameters().is_empty());
        assert!(err.arguments().inner().is_empty());
    }

    #[test]
    fn invalid_setup_has_no_cause() {
        let err = BowlerError::invalid_setup(
            "dead letter exchange name must not be empty",
            DeclarationParameters::new(),
            FieldTable::default(),
        );

        assert_eq!(err.kind(), ErrorKind::InvalidSetup);
        assert!(err.cause().is_none());
        assert_eq!(
            err.to_string(),
            "invalid setup: dead letter exchange name must not be empty"
        );
    }
}
