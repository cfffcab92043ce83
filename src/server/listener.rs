use crate::config::{ConfigError, ServerConfig};
use crate::dispatcher::Handler;
use crate::worker_pool::{Initializer, PoolStats, WorkerContext, WorkerPool, WorkerPoolMetrics};
use may::coroutine::JoinHandle;
use may::net::{TcpListener, TcpStream};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// SCGI application server: one acceptor plus an elastic worker pool
pub struct Server {
    config: Arc<ServerConfig>,
    init: Initializer,
}

impl Server {
    /// Validate the configuration and bind it to a per-worker initializer
    ///
    /// # Errors
    ///
    /// The configuration is inconsistent.
    pub fn new(config: ServerConfig, init: Initializer) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            init,
        })
    }

    /// Like [`Server::new`] with a typed handler factory
    ///
    /// # Errors
    ///
    /// The configuration is inconsistent.
    pub fn with_factory<F, H>(config: ServerConfig, factory: F) -> Result<Self, ConfigError>
    where
        F: Fn(&WorkerContext) -> anyhow::Result<H> + Send + Sync + 'static,
        H: Handler + 'static,
    {
        let init: Initializer =
            Arc::new(move |ctx: &WorkerContext| factory(ctx).map(|h| Box::new(h) as Box<dyn Handler>));
        Self::new(config, init)
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listener and start accepting
    ///
    /// # Errors
    ///
    /// The address cannot be bound or the acceptor cannot be spawned.
    pub fn start(self) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind((self.config.bind.as_str(), self.config.port))?;
        let addr = listener.local_addr()?;
        let pool = WorkerPool::<TcpStream>::new(Arc::clone(&self.config), self.init);
        let metrics = Arc::clone(pool.metrics());
        let ready = Arc::new(AtomicBool::new(false));
        let acceptor_ready = Arc::clone(&ready);

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The acceptor owns the listener and the pool outright.
        let handle = unsafe {
            may::coroutine::Builder::new()
                .name("scgi-acceptor".to_string())
                .stack_size(self.config.stack_size)
                .spawn(move || accept_loop(listener, pool, &acceptor_ready))?
        };
        info!(
            addr = %addr,
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            "SCGI server listening"
        );
        Ok(ServerHandle {
            addr,
            handle,
            metrics,
            ready,
        })
    }
}

/// Accept forever, handing each connection to the pool untouched
fn accept_loop(listener: TcpListener, pool: WorkerPool<TcpStream>, ready: &AtomicBool) {
    ready.store(true, Ordering::Release);
    for stream in listener.incoming() {
        match stream {
            Ok(conn) => {
                if pool.handoff(conn).is_err() {
                    warn!("Worker pool closed, acceptor exiting");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }
}

/// Handle to a running server
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    metrics: Arc<WorkerPoolMetrics>,
    /// Set once the acceptor coroutine is running
    ready: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Wait for the acceptor coroutine to start.
    ///
    /// The listener is already bound, so nothing touches the socket here.
    ///
    /// # Errors
    ///
    /// `TimedOut` if the acceptor has not started within ~1s.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..200 {
            if self.ready.load(Ordering::Acquire) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    /// Stop accepting and tear the pool down.
    ///
    /// In-flight requests finish on their workers.
    pub fn stop(self) {
        // SAFETY: may::CoroutineHandle::coroutine().cancel() is marked unsafe by the may runtime.
        // The handle is owned here and cancellation is the intended shutdown path;
        // unwinding the acceptor drops the pool, which releases every worker.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
        info!(addr = %self.addr, "SCGI server stopped");
    }

    /// Block until the acceptor exits
    ///
    /// # Errors
    ///
    /// The acceptor coroutine panicked.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}
