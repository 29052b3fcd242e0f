//! The HTTP side of the server: a `may_minihttp` accept loop handing every
//! request to the [`Dispatcher`].

use super::service::AppService;
use crate::dispatcher::Dispatcher;
use may::coroutine::JoinHandle;
use may_minihttp::HttpServerWithHeaders;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Header slots per request. Proxies in front of the grader add their own.
const MAX_HEADERS: usize = 32;

const READY_TIMEOUT: Duration = Duration::from_millis(250);
const READY_POLL: Duration = Duration::from_millis(5);

/// A bound HTTP listener serving one dispatcher.
pub struct HttpListener {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl HttpListener {
    /// Serve `dispatcher` on every interface at `port`. Returns once the
    /// listener accepts connections.
    pub fn bind(dispatcher: Dispatcher, port: u16) -> io::Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let handle =
            HttpServerWithHeaders::<_, MAX_HEADERS>(AppService::new(dispatcher)).start(addr)?;
        let listener = Self { addr, handle };

        if let Err(e) = listener.wait_ready() {
            listener.stop();
            return Err(e);
        }
        debug!(port, "HTTP listener ready");
        Ok(listener)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll the loopback address until a connect succeeds.
    fn wait_ready(&self) -> io::Result<()> {
        let probe = SocketAddr::from((Ipv4Addr::LOCALHOST, self.addr.port()));
        let deadline = Instant::now() + READY_TIMEOUT;
        while Instant::now() < deadline {
            if TcpStream::connect(probe).is_ok() {
                return Ok(());
            }
            thread::sleep(READY_POLL);
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("HTTP listener on port {} not ready", self.addr.port()),
        ))
    }

    /// Cancel the accept loop and wait for it to exit.
    pub fn stop(self) {
        // SAFETY: may marks coroutine cancellation unsafe. The handle is owned
        // here and the coroutine is the accept loop, which holds no locks of ours.
        unsafe {
            self.handle.coroutine().cancel();
        }
        if self.handle.join().is_err() {
            debug!(port = self.addr.port(), "HTTP accept loop ended by cancellation");
        }
    }
}
