use std::{io, sync::Arc};

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};

/// A `TcpStream`, optionally upgraded to TLS in place, which implements
/// `AsyncRead` and `AsyncWrite` transparently.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    /// Wrap the plain stream in a TLS session.
    ///
    /// Only valid right after the server agreed to the upgrade; calling it
    /// on an already-upgraded socket is a bug.
    pub async fn upgrade_tls(self, config: Arc<rustls::ClientConfig>, host: &str) -> io::Result<Socket> {
        let Kind::Tcp(tcp) = self.kind else {
            return Err(io::Error::other("socket already upgraded to tls"));
        };

        let domain = ServerName::try_from(host.to_string())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        let stream = TlsConnector::from(config).connect(domain, tcp).await?;
        Ok(Socket { kind: Kind::Tls(Box::new(stream)) })
    }
}

impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            Kind::Tls(t) => Pin::new(t).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::result::Result<usize, std::io::Error>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            Kind::Tls(t) => Pin::new(t).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_flush(cx),
            Kind::Tls(t) => Pin::new(t).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            Kind::Tls(t) => Pin::new(t).poll_shutdown(cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match &self.kind {
            Kind::Tcp(t) => t.is_write_vectored(),
            Kind::Tls(t) => t.is_write_vectored(),
        }
    }

    fn poll_write_vectored(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> std::task::Poll<Result<usize, io::Error>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write_vectored(cx, bufs),
            Kind::Tls(t) => Pin::new(t).poll_write_vectored(cx, bufs),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Tcp(tcp) => std::fmt::Debug::fmt(tcp, f),
            Kind::Tls(tls) => std::fmt::Debug::fmt(tls, f),
        }
    }
}
