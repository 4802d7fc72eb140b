use futures::StreamExt;
use kanari::config::ControllerConfig;
use kanari::controller::clock::SystemClock;
use kanari::controller::events::KubeEventPublisher;
use kanari::controller::{error_policy, reconcile, Context};
use kanari::crd::generation::Generation;
use kanari::crd::workload::Workload;
use kanari::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
};
use kanari::store::KubeStore;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // kube and reqwest both use rustls; pick the provider once for the process
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = ControllerConfig::from_env();
    info!(
        health_port = config.health_port,
        namespace = ?config.watch_namespace,
        "Starting kanari workload controller"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();
    let metrics = create_metrics()?;

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    let health_handle = tokio::spawn(async move {
        if let Err(e) = run_health_server(health_port, health_readiness, health_metrics).await {
            warn!(error = %e, "Health server failed");
        }
    });

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let (workloads, generations): (Api<Workload>, Api<Generation>) =
        match &config.watch_namespace {
            Some(ns) => (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };

    let store = Arc::new(KubeStore::new(client.clone()));
    let ctx = Arc::new(Context::new(
        store.clone(),
        store,
        Arc::new(SystemClock),
        Arc::new(KubeEventPublisher::new(client.clone())),
        Some(metrics),
        config,
    ));

    readiness.set_ready();
    info!("Controller ready, starting reconciliation loop");

    // error_policy logs failures, so only successes are logged here
    let controller = Controller::new(workloads, watcher::Config::default())
        .owns(generations, watcher::Config::default())
        .graceful_shutdown_on(shutdown_signal.wait())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((obj, action)) = res {
                info!(workload = %obj.name, namespace = ?obj.namespace, ?action, "Reconciled");
            }
        });

    let controller_handle = tokio::spawn(controller);

    match wait_for_signal().await {
        Ok(signal) => info!(signal, "Initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Cannot listen for termination signals, shutting down"),
    }
    readiness.set_not_ready();
    shutdown_controller.shutdown();

    if let Err(e) = controller_handle.await {
        warn!(error = %e, "Controller task ended abnormally");
    }
    health_handle.abort();

    info!("kanari controller shut down gracefully");
    Ok(())
}
