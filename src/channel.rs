// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! Opens the connection to RabbitMQ and the channels consumers and producers run on.
//! Failures are classified with connection scope, so any protocol error here is a
//! setup problem.

use crate::{
    broker::BrokerChannel,
    configs::RabbitMQConfigs,
    errors::{BowlerError, DeclarationParameters},
    exception::ExceptionTranslator,
};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// An open AMQP connection together with its first channel.
///
/// Failures while opening or closing are reported through the translator given to
/// [`connect`](AmqpConnection::connect).
pub struct AmqpConnection {
    connection: Arc<Connection>,
    channel: Arc<Channel>,
    translator: ExceptionTranslator,
}

impl AmqpConnection {
    /// Connects with `cfg` and opens a first channel.
    ///
    /// ```ignore
    /// let cfg = RabbitMQConfigs::from_env()?;
    /// let conn = AmqpConnection::connect(&cfg, &ExceptionTranslator::default()).await?;
    /// let consumer = Consumer::new(conn.channel(), topology, Arc::new(TracingExceptionHandler));
    /// ```
    pub async fn connect(
        cfg: &RabbitMQConfigs,
        translator: &ExceptionTranslator,
    ) -> Result<AmqpConnection, BowlerError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.app_name.clone()));

        let conn = match Connection::connect(&cfg.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(translator.translate_setup(err, Self::parameters(cfg)))
            }
        }?;
        debug!("amqp connected");

        let connection = Arc::new(conn);
        let channel = Self::open_channel(&connection, translator).await?;

        Ok(AmqpConnection {
            connection,
            channel,
            translator: translator.clone(),
        })
    }

    /// The channel opened by [`connect`](Self::connect).
    pub fn channel(&self) -> Arc<dyn BrokerChannel> {
        self.channel.clone()
    }

    /// Opens another channel. Each consumer should own one.
    pub async fn new_channel(&self) -> Result<Arc<dyn BrokerChannel>, BowlerError> {
        let channel: Arc<dyn BrokerChannel> =
            Self::open_channel(&self.connection, &self.translator).await?;
        Ok(channel)
    }

    /// The underlying `lapin` connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Closes the connection and every channel opened on it.
    ///
    /// # Returns
    /// `Ok(())` once the broker confirmed the close, or the classified failure
    pub async fn close(&self) -> Result<(), BowlerError> {
        debug!("closing amqp connection...");
        match self.connection.close(200, "OK").await {
            Err(err) => {
                error!(error = err.to_string(), "failure to close connection");
                Err(self
                    .translator
                    .translate_setup(err, DeclarationParameters::new()))
            }
            _ => Ok(()),
        }
    }

    async fn open_channel(
        connection: &Connection,
        translator: &ExceptionTranslator,
    ) -> Result<Arc<Channel>, BowlerError> {
        debug!("creating amqp channel...");
        match connection.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(c))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(translator.translate_setup(err, DeclarationParameters::new()))
            }
        }
    }

    fn parameters(cfg: &RabbitMQConfigs) -> DeclarationParameters {
        DeclarationParameters::new()
            .with("host", cfg.host.as_str())
            .with("port", cfg.port)
            .with("vhost", cfg.vhost.as_str())
            .with("user", cfg.user.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ErrorKind, testing::RecordingExceptionHandler};

    #[tokio::test]
    async fn refused_connection_is_reported_with_connection_parameters() {
        let hooks = Arc::new(RecordingExceptionHandler::default());
        let translator = ExceptionTranslator::new(hooks.clone());
        let cfg = RabbitMQConfigs {
            host: "127.0.0.1".to_owned(),
            port: 1,
            ..RabbitMQConfigs::default()
        };

        let err = match AmqpConnection::connect(&cfg, &translator).await {
            Err(err) => err,
            Ok(_) => panic!("connected to a closed port"),
        };

        assert_eq!(err.kind(), ErrorKind::BowlerGeneral);
        assert!(err.cause().is_some());
        assert_eq!(
            err.parameters().get("port").and_then(|v| v.as_u64()),
            Some(1)
        );
        assert_eq!(hooks.calls().len(), 2);
    }
}
