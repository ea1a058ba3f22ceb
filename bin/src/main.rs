use std::time::Duration;

use halberd_core::config;
use halberd_core::router::RouteMatcher;
use halberd_core::runtime::{Dispatcher, TlsRegistry};
use halberd_core::server::{Runtime, Server};
use halberd_core::service::{HttpProxy, Service};
use halberd_core::upstream::ClusterManager;

fn main() {
    Server::<HttpProxy>::init_logging();
    let config = config::load_config(std::env::args().nth(1).as_deref());

    // the control runtime runs the main dispatcher and cluster bookkeeping,
    // the worker runtime runs the proxy service and its event loop
    let control_runtime = Runtime::new("halberd-control", 1);
    let worker_runtime = Runtime::new("halberd-worker", config.server.threads);

    let registry = {
        let _guard = control_runtime.handle().enter();
        TlsRegistry::new(Dispatcher::spawn("main"))
    };
    let worker = {
        let _guard = worker_runtime.handle().enter();
        registry.register_worker(Dispatcher::spawn("worker-0"))
    };
    let cluster_manager = {
        let _guard = control_runtime.handle().enter();
        ClusterManager::new(registry.clone(), None)
    };

    for cluster_config in &config.clusters {
        let cluster = config::cluster::build_cluster(cluster_config);
        cluster_manager.add_or_update_cluster(cluster);
    }
    cluster_manager
        .init_helper()
        .set_initialized_cb(|| tracing::info!("all clusters initialized"));
    cluster_manager.init_helper().on_static_load_complete();

    let matcher = RouteMatcher::new(config::route::build_route_config(&config.route_config));
    let mut proxy = HttpProxy::new(matcher, cluster_manager, worker);
    if let Some(ms) = config.server.request_timeout_ms {
        proxy.set_request_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = config.server.idle_timeout_ms {
        proxy.set_idle_timeout(Duration::from_millis(ms));
    }

    let mut service = Service::new("http-proxy", proxy);
    for listener in &config.listeners {
        if let Err(e) = service.add_tcp(&listener.address) {
            panic!("bad listener address {}: {}", listener.address, e);
        }
    }

    let mut server = Server::new();
    server.add_service(service, worker_runtime);
    let _control = control_runtime;
    server.run_forever();
}
