//! Full server lifecycle: claim the work dir, serve HTTP and the admin
//! socket, run the task engine, and take it all down again.

use super::http_server::HttpListener;
use super::status::{ServerInitiator, StatusFile, StatusGuard};
use crate::config::options;
use crate::dispatcher::Dispatcher;
use crate::router::Router;
use crate::services::Services;
use crate::task::TaskEngine;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// A running server. [`stop`](Self::stop) shuts everything down in reverse
/// start order; dropping without stopping only releases the status file.
pub struct AppServer {
    http: HttpListener,
    #[cfg(unix)]
    socket: super::unix_socket::UnixSocketServer,
    engine: TaskEngine,
    status: StatusGuard,
}

impl AppServer {
    /// Start serving `router` on `web.http.port`.
    pub fn start(services: Services, router: Router, initiator: ServerInitiator) -> Result<Self> {
        let config = Arc::clone(&services.config);
        let work_dir = config
            .ensure_work_dirs()
            .context("Failed to create work dirs")?;

        let status = StatusFile::new(&config)
            .claim(initiator, services.random.as_ref())
            .context("Failed to claim the server status file")?;

        if options::LOAD_TEST_DATA.get(&config) {
            crate::testdata::seed(&services)?;
        }

        let port = u16::try_from(options::WEB_HTTP_PORT.get(&config))
            .context("Invalid web.http.port")?;

        let dispatcher = Dispatcher::new(Arc::new(router), services.clone());
        let http = HttpListener::bind(dispatcher, port)
            .with_context(|| format!("Failed to serve HTTP on port {port}"))?;

        #[cfg(unix)]
        let socket = match super::unix_socket::UnixSocketServer::start(
            status.socket_path(),
            port,
            services.clone(),
        ) {
            Ok(socket) => socket,
            Err(e) => {
                http.stop();
                return Err(e).context("Failed to start unix socket server");
            }
        };

        let engine = TaskEngine::new(services);
        if let Err(e) = engine.schedule_all() {
            error!(error = %format!("{e:#}"), "Failed to schedule course tasks");
        }

        info!(
            work_dir = %work_dir.display(),
            port,
            initiator = %initiator,
            "Server started"
        );

        Ok(Self {
            http,
            #[cfg(unix)]
            socket,
            engine,
            status,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.http.addr()
    }

    pub fn socket_path(&self) -> &Path {
        self.status.socket_path()
    }

    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    /// Stop tasks, the admin socket and the HTTP listener, then release the
    /// status file.
    pub fn stop(self) {
        let Self {
            http,
            #[cfg(unix)]
            socket,
            engine,
            status,
        } = self;

        engine.stop_all();
        #[cfg(unix)]
        socket.stop();
        http.stop();
        drop(status);

        info!("Server stopped");
    }
}
