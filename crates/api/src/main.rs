use std::sync::Arc;

use courier_api::app::{AppServices, build_app};
use courier_infra::{Scheduler, Settings};
use courier_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    courier_observability::init(LogFormat::from_json_flag(settings.log_json));

    let services = Arc::new(AppServices::from_settings(&settings).await?);

    let scheduler = settings.pipeline.scheduler_enabled.then(|| {
        Scheduler::spawn(
            services.pipeline.runner.clone(),
            settings.pipeline_settings().schedule_interval,
        )
    });

    let addr = settings.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, build_app(services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
