use std::sync::Arc;

use dotenv::dotenv;
use tokio::runtime::{Builder, Handle};
use tokio::signal::unix;
use tracing_subscriber::EnvFilter;

use crate::service::runner::{Service, ServiceApp};

/// a named tokio multi-thread runtime
pub struct Runtime {
    runtime: tokio::runtime::Runtime,
}

impl Runtime {
    pub fn new(thread_name: &str, alloc_threads: usize) -> Runtime {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(alloc_threads.max(1))
            .thread_name(thread_name)
            .build()
            .unwrap_or_else(|e| panic!("failed to build runtime {}: {}", thread_name, e));
        Runtime { runtime }
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }
}

/// how the process was asked to go away
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownType {
    Graceful,
    Fast,
}

/// owns the services and their runtimes; `run_forever` blocks the calling
/// thread until a shutdown signal lands
pub struct Server<A> {
    services: Vec<(Arc<Service<A>>, Runtime)>,
}

impl<A: ServiceApp> Server<A> {
    pub fn new() -> Server<A> {
        Server {
            services: Vec::new(),
        }
    }

    /// install tracing once per process; respects RUST_LOG
    pub fn init_logging() {
        dotenv().ok();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    }

    /// add a service together with the runtime it should run on
    pub fn add_service(&mut self, service: Service<A>, runtime: Runtime) {
        self.services.push((Arc::new(service), runtime));
    }

    /// start every service and block until a signal arrives
    pub fn run_forever(mut self) {
        Self::init_logging();
        tracing::info!("starting {} services", self.services.len());
        let mut runtimes = Vec::new();
        while let Some((service, runtime)) = self.services.pop() {
            tracing::info!("starting service {}", service.name());
            runtime.handle().spawn(service.start());
            runtimes.push(runtime);
        }

        let main_runtime = Runtime::new("halberd-main", 1);
        let shutdown = main_runtime.handle().block_on(Self::wait_for_shutdown());
        match shutdown {
            ShutdownType::Graceful => tracing::info!("graceful shutdown"),
            ShutdownType::Fast => tracing::info!("fast shutdown"),
        }
    }

    async fn wait_for_shutdown() -> ShutdownType {
        let mut quit = match unix::signal(unix::SignalKind::quit()) {
            Ok(signal) => signal,
            Err(e) => panic!("failed to install SIGQUIT handler: {}", e),
        };
        let mut terminate = match unix::signal(unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => panic!("failed to install SIGTERM handler: {}", e),
        };
        let mut interrupt = match unix::signal(unix::SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(e) => panic!("failed to install SIGINT handler: {}", e),
        };
        tokio::select! {
            _ = quit.recv() => ShutdownType::Graceful,
            _ = terminate.recv() => ShutdownType::Graceful,
            _ = interrupt.recv() => ShutdownType::Fast,
        }
    }
}

impl<A: ServiceApp> Default for Server<A> {
    fn default() -> Self {
        Server::new()
    }
}
