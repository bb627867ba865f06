// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Configuration
//!
//! Connection settings for RabbitMQ, read from the environment or deserialized
//! from any serde source. Missing values fall back to the local broker defaults.

use crate::errors::{BowlerError, DeclarationParameters};
use serde::Deserialize;
use std::env;

/// Environment variables read by [`RabbitMQConfigs::from_env`].
pub const APP_NAME_ENV_KEY: &str = "APP_NAME";
pub const RABBITMQ_HOST_ENV_KEY: &str = "RABBITMQ_HOST";
pub const RABBITMQ_PORT_ENV_KEY: &str = "RABBITMQ_PORT";
pub const RABBITMQ_USER_ENV_KEY: &str = "RABBITMQ_USER";
pub const RABBITMQ_PASSWORD_ENV_KEY: &str = "RABBITMQ_PASSWORD";
pub const RABBITMQ_VHOST_ENV_KEY: &str = "RABBITMQ_VHOST";

/// Connection settings for RabbitMQ.
///
/// Missing fields take their [`Default`] value when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            app_name: "bowler".to_owned(),
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    /// Reads the settings from the environment, keeping defaults for unset variables.
    ///
    /// # Returns
    /// The settings, or an `InvalidSetup` error when `RABBITMQ_PORT` is not a port number
    pub fn from_env() -> Result<RabbitMQConfigs, BowlerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<RabbitMQConfigs, BowlerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = RabbitMQConfigs::default();

        if let Some(name) = lookup(APP_NAME_ENV_KEY) {
            cfg.app_name = name;
        }
        if let Some(host) = lookup(RABBITMQ_HOST_ENV_KEY) {
            cfg.host = host;
        }
        if let Some(port) = lookup(RABBITMQ_PORT_ENV_KEY) {
            cfg.port = port.parse().map_err(|_| {
                BowlerError::invalid_setup(
                    "invalid rabbitmq port",
                    DeclarationParameters::new().with(RABBITMQ_PORT_ENV_KEY, port.as_str()),
                    Default::default(),
                )
            })?;
        }
        if let Some(user) = lookup(RABBITMQ_USER_ENV_KEY) {
            cfg.user = user;
        }
        if let Some(password) = lookup(RABBITMQ_PASSWORD_ENV_KEY) {
            cfg.password = password;
        }
        if let Some(vhost) = lookup(RABBITMQ_VHOST_ENV_KEY) {
            cfg.vhost = vhost;
        }

        Ok(cfg)
    }

    /// AMQP URI for these settings. A `/` vhost is sent percent-encoded.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user,
            self.password,
            self.host,
            self.port,
            self.vhost.replace('/', "%2f")
        )
    }
}
