//! Postgres connection.
//!
//! A connection goes through the [`Startup`], [`Secured`], [`Authenticating`] and
//! [`Authenticated`] phases before it becomes a [`Connection`], ready for query.
use std::{collections::HashMap, time::Duration};

use crate::{
    Result,
    event::Subscribable,
    postgres::{Notice, Notification, ParameterStatus, ProtocolError, TransactionStatus},
    transport::Transport,
};

mod config;
mod error;
mod context;
mod startup;
mod cancel;

pub use config::{Config, ParseError, SslMode};
pub use error::ConfigError;
pub use startup::{Authenticated, Authenticating, Secured, Startup};
pub use cancel::{CancelKey, cancel};
pub(crate) use context::Context;

/// Postgres connection, ready for query.
pub struct Connection<T> {
    ctx: Context<T>,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(ctx: Context<T>) -> Self {
        Self { ctx }
    }

    /// Backend process id, if the backend sent one.
    pub fn process_id(&self) -> Option<i32> {
        self.ctx.key_data.as_ref().map(|e| e.process_id)
    }

    /// Backend secret key, if the backend sent one.
    pub fn secret_key(&self) -> Option<i32> {
        self.ctx.key_data.as_ref().map(|e| e.secret_key)
    }

    /// Key to cancel queries running in this connection, see [`cancel`].
    pub fn cancel_key(&self) -> Option<CancelKey> {
        let key = self.ctx.key_data.as_ref()?;
        Some(CancelKey { process_id: key.process_id, secret_key: key.secret_key })
    }

    /// Transaction status from the last `ReadyForQuery`.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.ctx.transaction_status
    }

    /// Run-time parameters reported by the backend.
    pub fn runtime_params(&self) -> &HashMap<String, String> {
        &self.ctx.runtime_params
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.ctx.runtime_params.get(name).map(String::as_str)
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn local_port(&self) -> Option<u16> {
        self.ctx.io.local_port()
    }

    pub fn notices(&mut self) -> &mut Subscribable<Notice> {
        &mut self.ctx.notices
    }

    pub fn notifications(&mut self) -> &mut Subscribable<Notification> {
        &mut self.ctx.notifications
    }

    pub fn parameter_statuses(&mut self) -> &mut Subscribable<ParameterStatus> {
        &mut self.ctx.parameter_statuses
    }

    /// Wait for one unsolicited message from the backend.
    ///
    /// Notices, notifications and parameter changes are published to their subscribers, any
    /// other message is a protocol error.
    pub async fn tick(&mut self, timeout: Duration) -> Result<()> {
        let msgtype = self.ctx.recv(timeout).await?;
        if self.ctx.handle_general().await? {
            return Ok(());
        }
        Err(ProtocolError::unexpected_phase(msgtype, "unsolicited message tick").into())
    }

    /// Gracefully close the connection.
    pub async fn close(self) -> Result<()> {
        let mut ctx = self.ctx;
        ctx.terminate().await
    }

    /// Close the connection after an operation returned `result`.
    ///
    /// The error in `result` takes priority over any error from closing.
    pub async fn terminated<R>(self, result: Result<R>) -> Result<R> {
        self.ctx.terminated(result).await
    }
}

#[cfg(feature = "tokio")]
impl Connection<crate::net::Socket> {
    /// Connect using url, see [`Config::parse`].
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Connect using environment variables, see [`Config::try_from_env`].
    pub async fn connect_env() -> Result<Self> {
        Self::connect_with(Config::try_from_env()?).await
    }

    pub async fn connect_with(config: Config) -> Result<Self> {
        let io = crate::net::Socket::connect(&config).await?;
        Startup::new(config, io).auth().await
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &format_args!("{}", self.ctx))
            .field("process_id", &self.process_id())
            .field("transaction_status", &self.transaction_status())
            .finish()
    }
}
