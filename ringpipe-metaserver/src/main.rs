#[tokio::main]
async fn main() {
    if let Err(e) = ringpipe_metaserver::run().await {
        eprintln!("Metadata directory error: {}", e);
        std::process::exit(1);
    }
}
