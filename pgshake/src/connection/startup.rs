//! Connection handshake.
//!
//! Each phase owns the connection state, and consumes itself to produce the next phase. A phase
//! that fails closes the transport, without sending `Terminate`, and reports which phase failed as the
//! error [`context`][crate::Error::context].
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use super::{CancelKey, Config, ConfigError, Connection, Context, SslMode};
use crate::{
    Result,
    common::{debug, info},
    event::Subscribable,
    postgres::{
        Notice, Notification, ParameterStatus, ProtocolError,
        backend::{self, Authentication, BackendKeyData, ReadyForQuery},
        frontend::{self, CancelRequest, PasswordMessage, SslRequest},
    },
    transport::Transport,
};

const SSL: &str = "ssl negotiation";
const STARTUP: &str = "startup";
const AUTHENTICATION: &str = "authentication";
const POST_AUTHENTICATION: &str = "post-authentication";

/// Fresh connection, nothing has been sent.
///
/// Subscribe to the event buses here to observe messages sent during the handshake.
pub struct Startup<T> {
    ctx: Context<T>,
}

/// Ssl negotiated, or skipped.
pub struct Secured<T> {
    ctx: Context<T>,
}

/// Startup message sent, waiting for the backend authentication request.
pub struct Authenticating<T> {
    ctx: Context<T>,
}

/// Authentication succeeded, waiting for backend to be ready.
pub struct Authenticated<T> {
    ctx: Context<T>,
}

macro_rules! step {
    ($ctx:ident, $phase:expr, $op:expr) => {
        match $op {
            Ok(ok) => ok,
            Err(err) => return Err($ctx.abort(err, $phase).await),
        }
    };
}

impl<T: Transport> Startup<T> {
    pub fn new(config: Config, io: T) -> Self {
        Self { ctx: Context::new(config, io) }
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
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

    /// Run the whole handshake.
    pub async fn auth(self) -> Result<Connection<T>> {
        self.secure()
            .await?
            .send_startup()
            .await?
            .authenticate()
            .await?
            .ready()
            .await
    }

    /// Negotiate ssl according to [`SslMode`].
    pub async fn secure(self) -> Result<Secured<T>> {
        let mut ctx = self.ctx;

        let required = match ctx.config.ssl {
            SslMode::Disable => return Ok(Secured { ctx }),
            SslMode::Prefer => false,
            SslMode::Require => true,
        };

        if !step!(ctx, SSL, ctx.request_ssl(required).await) {
            return Ok(Secured { ctx });
        }

        debug!("{ctx} Upgrading transport");
        match ctx.upgrade().await {
            Ok(ctx) => Ok(Secured { ctx }),
            Err(err) => Err(err.with_context(SSL)),
        }
    }

    /// Send a [`CancelRequest`] in place of the handshake, then close.
    ///
    /// The backend does not reply to it.
    pub async fn cancel_other(self, key: CancelKey) -> Result<()> {
        let mut ctx = self.ctx;
        debug!("{ctx} Cancelling backend {}", key.process_id);
        CancelRequest { process_id: key.process_id, secret_key: key.secret_key }.write(&mut ctx.buf);
        let sent = ctx.flush().await;
        let closed = ctx.io.close().await;
        sent?;
        closed?;
        Ok(())
    }
}

impl<T: Transport> Secured<T> {
    pub async fn send_startup(self) -> Result<Authenticating<T>> {
        let mut ctx = self.ctx;
        step!(ctx, STARTUP, ctx.send_startup().await);
        Ok(Authenticating { ctx })
    }
}

impl<T: Transport> Authenticating<T> {
    pub async fn authenticate(self) -> Result<Authenticated<T>> {
        let mut ctx = self.ctx;
        step!(ctx, AUTHENTICATION, ctx.authenticate().await);
        Ok(Authenticated { ctx })
    }
}

impl<T: Transport> Authenticated<T> {
    pub async fn ready(self) -> Result<Connection<T>> {
        let mut ctx = self.ctx;
        step!(ctx, POST_AUTHENTICATION, ctx.wait_ready().await);
        info!("{ctx} Connected");
        Ok(Connection::new(ctx))
    }
}

impl<T: Transport> Context<T> {
    /// Returns `true` if the backend accepts ssl.
    async fn request_ssl(&mut self, required: bool) -> Result<bool> {
        debug!("{self} Requesting ssl");
        SslRequest.write(&mut self.buf);
        self.flush().await?;

        // the response is a single unframed byte
        self.buf.clear();
        self.buf.set_limit(1);
        self.io.read_exact(self.buf.fill(), self.config.timeout).await?;

        match self.buf.tag() {
            b'S' => Ok(true),
            b'N' if required => Err(ConfigError::SslNotSupported.into()),
            b'N' => {
                info!("{self} Ssl refused by backend, continuing unencrypted");
                Ok(false)
            },
            found => Err(ProtocolError::UnknownSslResponse { found }.into()),
        }
    }

    async fn send_startup(&mut self) -> Result<()> {
        let config = &self.config;
        debug!("{self} Sending startup");
        frontend::Startup {
            protocol_version: config.protocol_version,
            user: &config.user,
            database: config.dbname.as_deref(),
            params: &config.params,
        }
        .write(&mut self.buf);
        self.flush().await
    }

    async fn authenticate(&mut self) -> Result<()> {
        loop {
            let msgtype = self.recv_non_general().await?;
            if msgtype != b'R' {
                return Err(ProtocolError::unexpected_phase(msgtype, AUTHENTICATION).into());
            }

            let auth = backend::decode::<Authentication>(&mut self.buf)?;
            debug!("{self} Authentication request {auth:?}");

            let Some(password) = self.config.pass.as_deref() else {
                return match auth {
                    Authentication::Ok => Ok(()),
                    _ => Err(ConfigError::PasswordRequired.into()),
                };
            };

            match auth {
                Authentication::Ok => return Ok(()),
                Authentication::CleartextPassword => {
                    frontend::write(PasswordMessage { password }, &mut self.buf);
                },
                Authentication::Md5Password { salt } => {
                    let password = frontend::md5_password(&self.config.user, password, salt);
                    frontend::write(PasswordMessage { password: &password }, &mut self.buf);
                },
            }

            self.flush().await?;
        }
    }

    /// Read until `ReadyForQuery`, collecting `BackendKeyData` on the way.
    async fn wait_ready(&mut self) -> Result<()> {
        loop {
            match self.recv_non_general().await? {
                // BackendKeyData
                b'K' => {
                    let key = backend::decode::<BackendKeyData>(&mut self.buf)?;
                    self.key_data = Some(key);
                },
                // ReadyForQuery
                b'Z' => {
                    let ready = backend::decode::<ReadyForQuery>(&mut self.buf)?;
                    self.transaction_status = Some(ready.status);
                    return Ok(());
                },
                // NegotiateProtocolVersion is not supported
                msgtype => {
                    return Err(ProtocolError::unexpected_phase(msgtype, POST_AUTHENTICATION).into());
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ErrorKind, postgres::TransactionStatus, testing::*};

    fn config() -> Config {
        Config::new("postgres").database("app").log_notices(false)
    }

    #[tokio::test]
    async fn ssl_refused_when_required() {
        let mock = MockTransport::new();
        mock.serve(b"N");

        let startup = Startup::new(config().ssl(SslMode::Require), mock.clone());
        let err = startup.secure().await.err().unwrap();

        assert!(matches!(err.kind(), ErrorKind::Config(ConfigError::SslNotSupported)));
        assert_eq!(err.context(), "ssl negotiation");

        let state = mock.state();
        // only the ssl request, no startup
        assert_eq!(state.writes.len(), 1);
        assert_eq!(state.writes[0].1.len(), 8);
        assert!(state.closed);
        assert_eq!(state.upgrades, 0);
    }

    #[tokio::test]
    async fn ssl_refused_when_preferred() {
        let mock = MockTransport::new();
        mock.serve(b"N");

        let startup = Startup::new(config().ssl(SslMode::Prefer), mock.clone());
        startup.secure().await.unwrap().send_startup().await.unwrap();

        let state = mock.state();
        assert_eq!(state.writes.len(), 2);
        assert!(!state.writes[1].0, "startup must not be encrypted");
        assert_eq!(&state.writes[1].1[4..8], &196_608i32.to_be_bytes());
        assert_eq!(state.upgrades, 0);
    }

    #[tokio::test]
    async fn ssl_skipped_when_disabled() {
        let mock = MockTransport::new();
        Startup::new(config(), mock.clone()).secure().await.unwrap();
        assert!(mock.state().writes.is_empty());
    }

    #[tokio::test]
    async fn ssl_unknown_response() {
        let mock = MockTransport::new();
        mock.serve(b"E");
        let err = Startup::new(config().ssl(SslMode::Prefer), mock.clone()).secure().await.err().unwrap();
        assert!(err.is_protocol());
        assert!(mock.state().closed);
    }

    #[tokio::test]
    async fn ssl_upgrade_failure() {
        let mock = MockTransport::new();
        mock.serve(b"S");
        mock.state().fail_upgrade = true;
        let err = Startup::new(config().ssl(SslMode::Require), mock.clone()).secure().await.err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert_eq!(err.context(), "ssl negotiation");
    }

    #[tokio::test]
    async fn trust_auth_sends_no_password() {
        let mock = MockTransport::new();
        mock.serve(&auth(0, &[]));
        mock.serve(&key_data(7, 8));
        mock.serve(&ready(b'I'));

        Startup::new(config().password("pw"), mock.clone()).auth().await.unwrap();

        let state = mock.state();
        assert!(state.writes.iter().all(|(_, w)| w[0] != b'p'));
    }

    #[tokio::test]
    async fn cleartext_without_password() {
        let mock = MockTransport::new();
        mock.serve(&auth(3, &[]));

        let err = Startup::new(config(), mock.clone()).auth().await.err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::Config(ConfigError::PasswordRequired)));
        assert_eq!(err.context(), "authentication");

        let state = mock.state();
        // only the startup message
        assert_eq!(state.writes.len(), 1);
        assert!(state.closed);
    }

    #[tokio::test]
    async fn cleartext_password() {
        let mock = MockTransport::new();
        mock.serve(&auth(3, &[]));
        mock.serve(&auth(0, &[]));
        mock.serve(&ready(b'I'));

        Startup::new(config().password("hunter2"), mock.clone()).auth().await.unwrap();
        assert_eq!(mock.state().writes[1].1, b"p\0\0\0\x0chunter2\0");
    }

    #[tokio::test]
    async fn md5_over_ssl() {
        let mock = MockTransport::new();
        mock.serve(b"S");
        mock.serve(&auth(5, &[1, 2, 3, 4]));
        mock.serve(&param("server_version", "17.0"));
        mock.serve(&auth(0, &[]));
        mock.serve(&key_data(100, 42));
        mock.serve(&ready(b'I'));

        let conn = Startup::new(config().ssl(SslMode::Require).password("secret"), mock.clone())
            .auth()
            .await
            .unwrap();

        assert_eq!(conn.process_id(), Some(100));
        assert_eq!(conn.secret_key(), Some(42));
        assert_eq!(conn.transaction_status(), Some(TransactionStatus::Idle));
        assert_eq!(conn.parameter("server_version"), Some("17.0"));

        let state = mock.state();
        assert_eq!(state.upgrades, 1);

        let passwords = state.writes.iter().filter(|(_, w)| w[0] == b'p').collect::<Vec<_>>();
        assert_eq!(passwords.len(), 1);
        let (encrypted, password) = passwords[0];
        assert!(encrypted);
        assert_eq!(&password[5..8], b"md5");
        assert_eq!(&password[5..password.len() - 1], b"md5bb41a296aab6baccb36ff243a562abff");

        // ssl request plain, everything after encrypted
        assert!(!state.writes[0].0);
        assert!(state.writes[1..].iter().all(|(encrypted, _)| *encrypted));
    }

    #[tokio::test]
    async fn unsupported_auth() {
        let mock = MockTransport::new();
        // SASL
        mock.serve(&auth(10, b"SCRAM-SHA-256\0\0"));
        let err = Startup::new(config().password("pw"), mock.clone()).auth().await.err().unwrap();
        assert!(err.is_protocol());
        assert_eq!(err.context(), "authentication");
    }

    #[tokio::test]
    async fn unexpected_message_in_authentication() {
        let mock = MockTransport::new();
        mock.serve(&ready(b'I'));
        let err = Startup::new(config(), mock.clone()).auth().await.err().unwrap();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn backend_error_during_auth() {
        let mock = MockTransport::new();
        mock.serve(&auth(3, &[]));
        mock.serve(&error(&[(b'S', "FATAL"), (b'C', "28P01"), (b'M', "password authentication failed")]));

        let err = Startup::new(config().password("wrong"), mock.clone()).auth().await.err().unwrap();
        assert_eq!(err.as_database().unwrap().code(), Some("28P01"));
        assert_eq!(err.context(), "authentication");
        assert!(mock.state().closed);
    }

    #[tokio::test]
    async fn unexpected_message_post_authentication() {
        let mock = MockTransport::new();
        mock.serve(&auth(0, &[]));
        mock.serve(&message(b'v', &[0, 0, 0, 0, 0, 0, 0, 0]));
        let err = Startup::new(config(), mock.clone()).auth().await.err().unwrap();
        assert!(err.is_protocol());
        assert_eq!(err.context(), "post-authentication");
    }

    #[tokio::test]
    async fn startup_write_failure() {
        let mock = MockTransport::new();
        mock.state().fail_write = true;
        let err = Startup::new(config(), mock.clone()).auth().await.err().unwrap();
        assert_eq!(err.context(), "startup");
        assert!(mock.state().closed);
    }

    #[tokio::test]
    async fn handshake_notices_reach_early_subscribers() {
        let mock = MockTransport::new();
        mock.serve(&auth(0, &[]));
        mock.serve(&notice(&[(b'S', "WARNING"), (b'M', "deprecated")]));
        mock.serve(&ready(b'T'));

        let seen = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
        let mut startup = Startup::new(config(), mock.clone());
        let log = seen.clone();
        startup.notices().subscribe(move |n: Notice| {
            log.lock().unwrap().push(n.message().map(str::to_owned));
            async { Ok(()) }
        });

        let conn = startup.auth().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), [Some("deprecated".to_owned())]);
        assert_eq!(conn.transaction_status(), Some(TransactionStatus::InTransaction));
        assert_eq!(conn.process_id(), None);
    }

    #[tokio::test]
    async fn cancel_other_sends_request_and_closes() {
        let mock = MockTransport::new();
        let key = CancelKey { process_id: 100, secret_key: 42 };
        Startup::new(config(), mock.clone()).cancel_other(key).await.unwrap();

        let state = mock.state();
        assert_eq!(state.writes.len(), 1);
        assert_eq!(
            state.writes[0].1,
            [0, 0, 0, 16, 0x04, 0xd2, 0x16, 0x2e, 0, 0, 0, 100, 0, 0, 0, 42],
        );
        assert!(state.closed);
    }
}
