use console::Term;
use tokio_util::sync::CancellationToken;

/// Exit status for a forced quit, matching the shell convention for SIGINT.
pub(crate) const FORCE_QUIT_EXIT_CODE: i32 = 130;

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first Ctrl+C cancels the returned token; the engine stops between
/// steps and records the run as blocked. A second Ctrl+C exits immediately.
pub(crate) fn setup_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing current step...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing current step");
        }

        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            if is_tty {
                eprintln!("Force quit!");
            }
            std::process::exit(FORCE_QUIT_EXIT_CODE);
        }
    });

    token
}
