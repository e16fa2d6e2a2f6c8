use std::{
    fmt, io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use futures_core::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::{Config, common::debug, transport::Transport};

/// An encrypted stream, produced by the function given to [`Socket::with_upgrade`].
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Stream for S {}

type Upgrade = Box<dyn FnOnce(Socket) -> BoxFuture<'static, io::Result<Box<dyn Stream>>> + Send>;

/// Either `TcpStream`, `UnixStream`, or an upgraded stream on top of one of them, which implement
/// `AsyncRead`, `AsyncWrite` and [`Transport`] transparently.
pub struct Socket {
    kind: Kind,
    local_port: Option<u16>,
    upgrade: Option<Upgrade>,
}

enum Kind {
    TokioTcp(tokio::net::TcpStream),
    #[cfg(unix)]
    TokioUnixSocket(tokio::net::UnixStream),
    Upgraded(Box<dyn Stream>),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = tokio::net::TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        let local_port = socket.local_addr().ok().map(|e| e.port());
        Ok(Socket { kind: Kind::TokioTcp(socket), local_port, upgrade: None })
    }

    pub async fn connect_socket(path: &str) -> io::Result<Socket> {
        #[cfg(unix)]
        {
            let socket = tokio::net::UnixStream::connect(path).await?;
            Ok(Socket { kind: Kind::TokioUnixSocket(socket), local_port: None, upgrade: None })
        }

        #[cfg(not(unix))]
        {
            let _ = path;
            Err(io::Error::new(io::ErrorKind::Unsupported, "unix socket is not supported"))
        }
    }

    /// Connect to the server in `config`, within its timeout.
    ///
    /// When [`Config::get_socket`] is set, it is the directory of the unix socket
    /// `.s.PGSQL.{port}`, unless it already points to the socket file.
    pub async fn connect(config: &Config) -> io::Result<Socket> {
        let connect = async {
            match config.get_socket() {
                Some(path) if path.contains(".s.PGSQL.") => Self::connect_socket(path).await,
                Some(dir) => {
                    let path = format!("{}/.s.PGSQL.{}", dir.trim_end_matches('/'), config.get_port());
                    Self::connect_socket(&path).await
                },
                None => Self::connect_tcp(config.get_host(), config.get_port()).await,
            }
        };

        debug!("Connecting to {}:{}", config.get_socket().unwrap_or(config.get_host()), config.get_port());
        with_timeout(config.get_timeout(), connect).await
    }

    /// Set the function called to encrypt the socket when the backend accepts ssl.
    ///
    /// ```no_run
    /// # async fn app(config: pgshake::Config) -> pgshake::Result<()> {
    /// use pgshake::{Socket, Startup};
    ///
    /// let socket = Socket::connect(&config).await?.with_upgrade(|socket| async move {
    ///     // hand the plain socket to a tls library
    ///     Ok(socket)
    /// });
    /// let conn = Startup::new(config, socket).auth().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_upgrade<F, Fut, S>(mut self, upgrade: F) -> Self
    where
        F: FnOnce(Socket) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<S>> + Send + 'static,
        S: Stream + 'static,
    {
        self.upgrade = Some(Box::new(move |socket| {
            Box::pin(async move {
                let stream = upgrade(socket).await?;
                Ok(Box::new(stream) as Box<dyn Stream>)
            })
        }));
        self
    }

    /// Returns `true` if the socket has been upgraded.
    pub fn is_upgraded(&self) -> bool {
        matches!(self.kind, Kind::Upgraded(_))
    }
}

async fn with_timeout<T>(duration: Duration, f: impl Future<Output = io::Result<T>>) -> io::Result<T> {
    match tokio::time::timeout(duration, f).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out")),
    }
}

impl Transport for Socket {
    async fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()> {
        with_timeout(timeout, async {
            AsyncReadExt::read_exact(self, buf).await?;
            Ok(())
        })
        .await
    }

    async fn write_all(&mut self, buf: &[u8], timeout: Duration) -> io::Result<()> {
        with_timeout(timeout, async {
            AsyncWriteExt::write_all(&mut *self, buf).await?;
            AsyncWriteExt::flush(&mut *self).await
        })
        .await
    }

    fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    async fn close(&mut self) -> io::Result<()> {
        match AsyncWriteExt::shutdown(self).await {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }

    async fn upgrade(mut self) -> io::Result<Self> {
        let Some(upgrade) = self.upgrade.take() else {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "no ssl upgrade configured"));
        };
        let local_port = self.local_port;
        let stream = upgrade(self).await?;
        Ok(Socket { kind: Kind::Upgraded(stream), local_port, upgrade: None })
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::TokioTcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            Kind::TokioUnixSocket(u) => Pin::new(u).poll_read(cx, buf),
            Kind::Upgraded(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            Kind::TokioTcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            Kind::TokioUnixSocket(u) => Pin::new(u).poll_write(cx, buf),
            Kind::Upgraded(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::TokioTcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(unix)]
            Kind::TokioUnixSocket(u) => Pin::new(u).poll_flush(cx),
            Kind::Upgraded(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::TokioTcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            Kind::TokioUnixSocket(u) => Pin::new(u).poll_shutdown(cx),
            Kind::Upgraded(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::TokioTcp(ref tcp) => fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::TokioUnixSocket(ref unix) => fmt::Debug::fmt(unix, f),
            Kind::Upgraded(_) => f.debug_struct("Socket").field("local_port", &self.local_port).finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::{io::AsyncReadExt as _, net::TcpListener};

    use super::*;

    async fn pair() -> (Socket, tokio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (socket, accepted) = tokio::join!(Socket::connect_tcp("127.0.0.1", port), listener.accept());
        (socket.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn read_write() {
        let (mut socket, mut server) = pair().await;
        assert!(socket.local_port().is_some());

        Transport::write_all(&mut socket, b"ping", Duration::from_secs(1)).await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        AsyncWriteExt::write_all(&mut server, b"pong").await.unwrap();
        Transport::read_exact(&mut socket, &mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf, b"pong");

        Transport::close(&mut socket).await.unwrap();
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_timeout() {
        let (mut socket, _server) = pair().await;
        let mut buf = [0u8; 1];
        let err = Transport::read_exact(&mut socket, &mut buf, Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn upgrade_without_upgrader() {
        let (socket, _server) = pair().await;
        let err = socket.upgrade().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn upgrade_keeps_local_port() {
        let (socket, _server) = pair().await;
        let port = socket.local_port();
        let socket = socket.with_upgrade(|socket| async move { Ok(socket) });
        let socket = socket.upgrade().await.unwrap();
        assert!(socket.is_upgraded());
        assert_eq!(socket.local_port(), port);
    }
}
