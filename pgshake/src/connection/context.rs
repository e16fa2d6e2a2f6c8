use std::{collections::HashMap, fmt, time::Duration};

use super::Config;
use crate::{
    Error, FrameBuf, Result,
    buf::HEADER_LEN,
    common::{debug, verbose, warn},
    event::Subscribable,
    postgres::{
        FrontendProtocol, Notice, Notification, ParameterStatus, ProtocolError, TransactionStatus,
        backend::{self, BackendKeyData, ErrorResponse},
        frontend::{self, Terminate},
    },
    transport::Transport,
};

#[cfg(feature = "verbose")]
use crate::ext::{FmtExt, TagExt};

/// State shared by every phase of one connection.
///
/// The transport is replaced, not wrapped, when the connection is upgraded to ssl.
pub(crate) struct Context<T> {
    pub(crate) config: Config,
    pub(crate) io: T,
    pub(crate) buf: FrameBuf,
    pub(crate) notices: Subscribable<Notice>,
    pub(crate) notifications: Subscribable<Notification>,
    pub(crate) parameter_statuses: Subscribable<ParameterStatus>,
    pub(crate) runtime_params: HashMap<String, String>,
    pub(crate) transaction_status: Option<TransactionStatus>,
    pub(crate) key_data: Option<BackendKeyData>,
}

impl<T: Transport> Context<T> {
    pub(crate) fn new(config: Config, io: T) -> Self {
        let mut me = Self {
            buf: FrameBuf::new(config.buffer_step),
            config,
            io,
            notices: Subscribable::new(),
            notifications: Subscribable::new(),
            parameter_statuses: Subscribable::new(),
            runtime_params: HashMap::new(),
            transaction_status: None,
            key_data: None,
        };

        #[cfg(feature = "log")]
        if me.config.log_notices {
            let target = me.to_string();
            me.notices.subscribe(move |notice: Notice| {
                notice.log(&target);
                std::future::ready(Ok(()))
            });
        }

        me
    }

    /// Write the buffered frontend message.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        verbose!("{self} Write {:?}", self.buf.chunk().lossy());
        self.io.write_all(self.buf.chunk(), self.config.timeout).await?;
        self.buf.clear();
        Ok(())
    }

    pub(crate) async fn send<F: FrontendProtocol>(&mut self, message: F) -> Result<()> {
        frontend::write(message, &mut self.buf);
        self.flush().await
    }

    /// Read one whole backend message into the buffer, returns its message type.
    ///
    /// The message is valid until the next read or write.
    pub(crate) async fn recv(&mut self, timeout: Duration) -> Result<u8> {
        // message type and length first
        self.buf.clear();
        self.buf.set_limit(HEADER_LEN);
        self.io.read_exact(self.buf.fill(), timeout).await?;

        let len = self.buf.peek_i32(1)?;
        if len < 4 {
            return Err(ProtocolError::malformed("invalid message length").into());
        }
        let len = len as usize;
        if 1 + len > self.config.max_message_size {
            return Err(ProtocolError::malformed("message too large").into());
        }

        verbose!("{self} Read message header of type {} with size {len}", self.buf.tag().tag());

        // then the rest of the message, length includes itself but not the message type
        self.buf.ensure_capacity(len - 4);
        self.buf.set_limit(1 + len);
        self.io.read_exact(self.buf.fill(), timeout).await?;
        self.buf.flip();

        Ok(self.buf.tag())
    }

    /// Handle a message that may arrive at any time.
    ///
    /// Returns `false` if the buffered message is not one of them, the buffer is left untouched.
    ///
    /// `ErrorResponse` is returned as [`Err`].
    pub(crate) async fn handle_general(&mut self) -> Result<bool> {
        match self.buf.tag() {
            // NotificationResponse
            b'A' => {
                let notification = backend::decode::<Notification>(&mut self.buf)?;
                self.notifications.publish(notification).await?;
            },
            // ErrorResponse
            b'E' => {
                let err = backend::decode::<ErrorResponse>(&mut self.buf)?;
                return Err(err.into());
            },
            // NoticeResponse
            b'N' => {
                let notice = backend::decode::<Notice>(&mut self.buf)?;
                self.notices.publish(notice).await?;
            },
            // ParameterStatus
            b'S' => {
                let status = backend::decode::<ParameterStatus>(&mut self.buf)?;
                self.runtime_params.insert(status.name.clone(), status.value.clone());
                self.parameter_statuses.publish(status).await?;
            },
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Read messages until one that is not handled by [`handle_general`][Self::handle_general].
    pub(crate) async fn recv_non_general(&mut self) -> Result<u8> {
        loop {
            let msgtype = self.recv(self.config.timeout).await?;
            if !self.handle_general().await? {
                return Ok(msgtype);
            }
        }
    }

    /// Send `Terminate` then close the transport, even if sending failed.
    pub(crate) async fn terminate(&mut self) -> Result<()> {
        debug!("{self} Terminating");
        let sent = self.send(Terminate).await;
        let closed = self.io.close().await;
        sent?;
        closed?;
        Ok(())
    }

    /// Terminate the connection, then return `result`.
    ///
    /// If both `result` and the termination failed, `result` error is returned and the termination
    /// error is only logged.
    pub(crate) async fn terminated<R>(mut self, result: Result<R>) -> Result<R> {
        let terminated = self.terminate().await;
        match (result, terminated) {
            (Err(err), Err(term)) => {
                warn!("{self} Failed terminating: {term}");
                Err(err)
            },
            (Err(err), Ok(())) => Err(err),
            (Ok(_), Err(term)) => Err(term),
            (Ok(ok), Ok(())) => Ok(ok),
        }
    }

    /// Close the transport after a failed handshake phase.
    ///
    /// Nothing is written to the backend.
    pub(crate) async fn abort(mut self, err: Error, phase: &'static str) -> Error {
        debug!("{self} Failed in {phase}: {err}");
        if let Err(close) = self.io.close().await {
            warn!("{self} Failed closing: {close}");
        }
        err.with_context(phase)
    }

    /// Replace the transport with an encrypted one.
    pub(crate) async fn upgrade(self) -> Result<Self> {
        let io = self.io.upgrade().await?;
        Ok(Self { io, ..self })
    }
}

impl<T: Transport> fmt::Display for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = &self.config;
        let host = config.socket.as_deref().unwrap_or(&config.host);
        let dbname = config.dbname.as_deref().unwrap_or(&config.user);
        match self.io.local_port() {
            Some(local) => write!(f, "[{}@{host}:{}->{local}/{dbname}]", config.user, config.port),
            None => write!(f, "[{}@{host}:{}/{dbname}]", config.user, config.port),
        }
    }
}
