use browser_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!("CLI error: {}", e);
        eprintln!("browser: {e}");

        // 1 configuration, 2 service, 3 askpass
        std::process::exit(e.exit_code());
    }
}
