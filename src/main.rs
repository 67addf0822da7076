use std::{future::IntoFuture, process, sync::Arc};

use html_pdf_export::{
    application::{
        error::AppError,
        render::{WkhtmltopdfRenderer, resolve_binary},
    },
    config,
    infra::{
        artifacts::ArtifactStore,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    telemetry::init(&settings.logging)?;

    match cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()))
    {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let artifacts = ArtifactStore::new(settings.artifacts.directory.clone());
    artifacts.provision().await.map_err(InfraError::from)?;

    let renderer = WkhtmltopdfRenderer::new(settings.render.binary.clone());
    if resolve_binary(renderer.binary()).is_none() {
        warn!(
            target = "html_pdf_export::serve",
            binary = %renderer.binary().display(),
            "Renderer binary not found; every conversion will fail until it is installed"
        );
    }

    let state = HttpState::new(artifacts, Arc::new(renderer), settings.render.timeout);
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "html_pdf_export::serve",
        addr = %settings.server.addr,
        tmpdir = %settings.artifacts.directory.display(),
        timeout_ms = settings.render.timeout.as_millis() as u64,
        "Listening on port {}...",
        settings.server.addr.port()
    );

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    let drain_deadline = async move {
        match signalled_rx.await {
            Ok(()) => tokio::time::sleep(grace).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = drain_deadline => {
            warn!(
                target = "html_pdf_export::serve",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "html_pdf_export::serve", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(target = "html_pdf_export::serve", "Shutdown signal received");
}
