pub mod service;
pub mod store;

pub use store::MetadataStore;

use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;

#[derive(Parser, Debug)]
#[command(
    name = "ringpipe-metaserver",
    about = "Ringpipe metadata directory - key/value exchange for peer handshakes"
)]
pub struct Cli {
    /// Address to bind, e.g. 0.0.0.0:9998
    #[arg(long, default_value = "127.0.0.1:9998")]
    pub addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Initialize logging with the specified log level
fn init_logging(level: &str) {
    use logforth::append;
    use logforth::filter::EnvFilter;
    use logforth::layout::TextLayout;

    let filter = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => {
            eprintln!("Invalid log level: {}, defaulting to info", level);
            "info"
        }
    };

    logforth::starter_log::builder()
        .dispatch(|d| {
            d.filter(EnvFilter::from(filter))
                .append(append::Stderr::default().with_layout(TextLayout::default().no_color()))
        })
        .apply();
}

/// Graceful shutdown signal handler
async fn shutdown_signal(notify: Arc<Notify>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
        _ = notify.notified() => {
            info!("Received shutdown notification");
        }
    }
}

/// Accept directory connections until the shutdown notifier fires.
///
/// The listener is bound by the caller so tests can use an ephemeral port.
pub async fn serve(listener: TcpListener, store: Arc<MetadataStore>, shutdown: Arc<Notify>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!("Accepted connection from {peer}");
                        let store = store.clone();
                        tokio::spawn(service::handle_connection(stream, store));
                    }
                    Err(err) => {
                        error!("Accept failed: {err}");
                    }
                }
            }
            _ = shutdown.notified() => {
                break;
            }
        }
    }
}

/// Run the metadata directory service.
pub async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!("Starting ringpipe metadata directory");
    info!("Binding to address: {}", cli.addr);

    let store = Arc::new(MetadataStore::new());
    let shutdown = Arc::new(Notify::new());

    let listener = TcpListener::bind(cli.addr).await?;
    info!("Listening on {}", cli.addr);

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_shutdown.clone()).await;
        // notify_one stores a permit in case serve is mid-accept.
        signal_shutdown.notify_one();
    });

    serve(listener, store, shutdown).await;

    info!("Metadata directory shut down gracefully");
    Ok(())
}
