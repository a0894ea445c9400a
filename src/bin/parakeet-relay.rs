use anyhow::Context;
use clap::Parser;
use parakeet_relay::cli::{execute_device_id, Cli, Commands};
use parakeet_relay::native::{build_router, init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            init_tracing(args.log_json);
            let settings = args.settings()?;
            info!(
                listen = %args.listen,
                max_entries = settings.max_entries,
                require_passcode = settings.require_passcode,
                use_geolocation = settings.use_geolocation,
                debug = settings.debug,
                "starting receiver"
            );

            let listener = tokio::net::TcpListener::bind(&args.listen)
                .await
                .with_context(|| format!("Failed to bind {}", args.listen))?;
            axum::serve(listener, build_router(settings))
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
                .context("server error")?;
        }
        Commands::DeviceId(args) => println!("{}", execute_device_id(&args)?),
    }

    Ok(())
}
