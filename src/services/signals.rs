use super::ServiceResult;
use super::manager::ServiceManager;
use crate::utils::fmt_duration;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Wait for SIGINT/SIGTERM or a service exit, then shut everything down.
pub async fn handle_shutdown_signals(
    mut service_manager: ServiceManager,
    shutdown_timeout: Duration,
) -> ExitCode {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
        info!("received ctrl+c, gracefully shutting down");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received SIGTERM, gracefully shutting down");
            }
            Err(e) => {
                error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    let mut exit_code = ExitCode::SUCCESS;

    tokio::select! {
        (name, result) = service_manager.run() => {
            match result {
                ServiceResult::GracefulShutdown => info!(service = %name, "service completed gracefully"),
                ServiceResult::NormalCompletion => warn!(service = %name, "service completed unexpectedly"),
                ServiceResult::Error(e) => {
                    error!(service = %name, error = ?e, "service failed");
                    exit_code = ExitCode::FAILURE;
                }
            }
        }
        _ = ctrl_c => {}
        _ = sigterm => {}
    }

    match service_manager.shutdown(shutdown_timeout).await {
        Ok(elapsed) => {
            info!(elapsed = fmt_duration(elapsed), "graceful shutdown complete");
        }
        Err(pending) => {
            warn!(
                pending_services = ?pending,
                timeout = fmt_duration(shutdown_timeout),
                "graceful shutdown elapsed, services did not complete"
            );
            exit_code = ExitCode::FAILURE;
        }
    }

    info!(exit_code = ?exit_code, "application shutdown complete");
    exit_code
}
