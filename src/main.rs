use anyhow::Context;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsAcceptor;
use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use tracing::{info, warn};
use utoipa::OpenApi;
use zipapi::config::AppConfig;
use zipapi::infrastructure::keepalive::KeepAliveAcceptor;
use zipapi::infrastructure::{logging, shutdown, store, tls};
use zipapi::{ApiDoc, AppState, create_app};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on, overrides HTTP_HOST
    #[arg(long)]
    host: Option<String>,

    /// Print the OpenAPI document as JSON and exit
    #[arg(long)]
    print_openapi: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    if args.print_openapi {
        println!("{}", ApiDoc::openapi().to_pretty_json()?);
        return Ok(());
    }

    // Log destinations are part of the config, so nothing is logged before this
    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    logging::init_tracing(&config.log).context("Failed to set up logging")?;

    info!("🚀 Starting zip archive service...");
    for warning in config.warnings() {
        warn!("⚠️  {}", warning);
    }
    info!(
        "🛡️  Mode={}, Max Request={} bytes, Max File={} bytes, Decode Buffer={} bytes, Keep-Alive={:?}",
        config.mode,
        config.limits.max_request_bytes,
        config.limits.max_file_bytes,
        config.limits.max_decode_buffer_bytes,
        config.keep_alive
    );

    let store = store::setup_store(&config).await?;
    let addr: SocketAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", config.host))?;
    let keep_alive = KeepAliveAcceptor::new(config.keep_alive);
    let tls_config = config.tls.clone();

    let app = create_app(AppState { config, store });

    let handle = Handle::new();
    shutdown::spawn_graceful_shutdown(handle.clone(), shutdown::wait_for_signal(), None);

    match tls_config {
        Some(tls_config) => {
            let rustls = tls::load_tls_config(&tls_config)
                .await
                .context("Failed to load TLS configuration")?;

            info!(
                "✅ Server ready at https://{} (TLS >= {:?})",
                addr, tls_config.min_version
            );
            axum_server::bind(addr)
                .acceptor(RustlsAcceptor::new(rustls).acceptor(keep_alive))
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("✅ Server ready at http://{}", addr);
            axum_server::bind(addr)
                .acceptor(keep_alive)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    info!("🛑 Server shut down gracefully.");
    Ok(())
}
