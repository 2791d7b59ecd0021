use runtime::{RuntimeBuilder, RuntimeConfig, demo, telemetry};
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Configuration and observability
    let config = RuntimeConfig::from_env();
    telemetry::init_tracing(&config).expect("failed to initialize tracing");
    let _metrics = telemetry::install_metrics(&config).expect("failed to install metrics");

    // 2. Register handlers and start the pipelines
    let mut builder = RuntimeBuilder::new(config);
    let bank = demo::register(&mut builder);
    let runtime = builder.build().await.expect("failed to start runtime");

    // 3. Only the elected instance drives the demo workload
    if let Some(Err(error)) = runtime
        .run_singleton("bank demo", || demo::run(&runtime, &bank))
        .await
    {
        tracing::error!(%error, "bank demo failed");
    }

    // 4. Serve until asked to stop
    shutdown_signal().await;
    let consumed = runtime.shutdown().await.expect("runtime shutdown failed");
    tracing::info!(consumed, "runtime shut down gracefully");
}
