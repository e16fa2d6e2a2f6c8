use std::time::Duration;

use crate::{FrameBuf, Result, common::debug, postgres::frontend::CancelRequest, transport::Transport};

/// Identify a backend for out-of-band query cancellation.
///
/// Obtained from [`Connection::cancel_key`][super::Connection::cancel_key].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelKey {
    pub process_id: i32,
    pub secret_key: i32,
}

/// Send a cancel request over a fresh `io`, then close it.
///
/// There is no reply, success only means the request was delivered. The backend may or may not
/// cancel the running query.
pub async fn cancel<T: Transport>(mut io: T, key: CancelKey, timeout: Duration) -> Result<()> {
    debug!("Cancelling backend {}", key.process_id);

    let mut buf = FrameBuf::new(16);
    CancelRequest { process_id: key.process_id, secret_key: key.secret_key }.write(&mut buf);

    let sent = io.write_all(buf.chunk(), timeout).await;
    let closed = io.close().await;
    sent?;
    closed?;
    Ok(())
}

#[cfg(feature = "tokio")]
impl CancelKey {
    /// Connect to the server in `config` and cancel this backend current query.
    pub async fn cancel_with(self, config: &super::Config) -> Result<()> {
        let io = crate::net::Socket::connect(config).await?;
        cancel(io, self, config.timeout).await
    }
}
