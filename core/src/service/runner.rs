use std::sync::Arc;

use async_trait::async_trait;
use futures::future;

use crate::network::address::Address;
use crate::network::listener::Listener;
use crate::prelude::Result;
use crate::stream::Stream;

/// what a service does with each accepted connection
#[async_trait]
pub trait ServiceApp: Send + Sync + 'static {
    async fn handle_connection(self: Arc<Self>, stream: Stream, peer: Address);
}

/// one named service: an app listening on one or more addresses.
/// many services can be served by one server.
pub struct Service<A> {
    name: String,
    app: Arc<A>,
    addresses: Vec<Address>,
}

impl<A> Service<A> {
    pub fn new(name: &str, app: A) -> Self {
        Service {
            name: name.to_string(),
            app: Arc::new(app),
            addresses: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn app(&self) -> &Arc<A> {
        &self.app
    }

    /// listen on a `host:port` string
    pub fn add_tcp(&mut self, address: &str) -> Result<()> {
        self.addresses.push(Address::parse(address)?);
        Ok(())
    }

    /// listen on a unix socket path
    pub fn add_unix_socket(&mut self, path: &str) {
        self.addresses.push(Address::Pipe(path.to_string()));
    }

    pub fn add_address(&mut self, address: Address) {
        self.addresses.push(address);
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }
}

impl<A: ServiceApp> Service<A> {
    /// bind every address and run the accept loops until the task dies
    pub async fn start(self: Arc<Self>) {
        let handles = self.addresses.clone().into_iter().map(|address| {
            let app = self.app.clone();
            let name = self.name.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::run_listener(app, &address).await {
                    tracing::error!("service {} listener {} failed: {}", name, address, e);
                }
            })
        });
        future::join_all(handles).await;
    }

    async fn run_listener(app: Arc<A>, address: &Address) -> Result<()> {
        let listener = Listener::bind(address).await?;
        tracing::info!("listening on {}", address);
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let app = app.clone();
                    tokio::spawn(async move {
                        app.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("accept on {} failed: {}", address, e);
                }
            }
        }
    }
}
