use axum_server::accept::Accept;
use socket2::{SockRef, TcpKeepalive};
use std::future::{Ready, ready};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Acceptor that turns on TCP keep-alive (and `TCP_NODELAY`) for every
/// accepted connection. Sits below the TLS acceptor when HTTPS is served.
#[derive(Clone, Copy, Debug)]
pub struct KeepAliveAcceptor {
    idle: Duration,
}

impl KeepAliveAcceptor {
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        let socket = SockRef::from(stream);
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(self.idle))?;
        stream.set_nodelay(true)
    }
}

impl<S> Accept<TcpStream, S> for KeepAliveAcceptor {
    type Stream = TcpStream;
    type Service = S;
    type Future = Ready<io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        ready(self.configure(&stream).map(|()| (stream, service)))
    }
}
