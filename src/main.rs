use std::io::Read;
use std::sync::Arc;

use smtp2rest::config::ConfigStore;
use smtp2rest::message::ParsedEmail;
use smtp2rest::pipeline::processor::RestMessageProcessor;
use smtp2rest::pipeline::resolver::SenderKeyExtractor;
use smtp2rest::pipeline::worker::{ProcessingLoop, QueuedMessage};
use smtp2rest::relay::{LettreMailTransport, RelayOptions, SmtpRelayProcessor};
use smtp2rest::rest::client::HttpRestClient;
use smtp2rest::rest::decorators::AggregateDecorator;

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Relay defaults for this process, ahead of the configuration and rule
/// layers.
fn relay_defaults() -> RelayOptions {
    let base = RelayOptions::default();
    RelayOptions {
        enabled: env_flag("SMTP2REST_RELAY_ENABLED", base.enabled),
        host: std::env::var("SMTP2REST_RELAY_HOST").unwrap_or(base.host),
        port: std::env::var("SMTP2REST_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(base.port),
        authenticate: env_flag("SMTP2REST_RELAY_AUTHENTICATE", base.authenticate),
        username: std::env::var("SMTP2REST_RELAY_USERNAME").unwrap_or(base.username),
        password: std::env::var("SMTP2REST_RELAY_PASSWORD").unwrap_or(base.password),
        use_ssl: env_flag("SMTP2REST_RELAY_USE_SSL", base.use_ssl),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SMTP2REST_CONFIG").ok())
        .unwrap_or_else(|| "configuration.json".to_string());

    let config = Arc::new(ConfigStore::from_file(&config_path)?);
    eprintln!("smtp2rest v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Configuration: {config_path}");
    eprintln!("   Reading RFC 822 message from stdin...\n");

    let mut raw = Vec::new();
    std::io::stdin().read_to_end(&mut raw)?;
    let Some(email) = ParsedEmail::parse(&raw) else {
        eprintln!("Error: stdin did not contain a parseable message");
        std::process::exit(1);
    };

    let key_extractor = Arc::new(SenderKeyExtractor);
    let processor = Arc::new(RestMessageProcessor::new(
        config.clone(),
        key_extractor.clone(),
        AggregateDecorator::built_in(config.clone()),
        Arc::new(HttpRestClient::default()),
    ));

    let (queue_tx, queue_rx) = tokio::sync::mpsc::channel::<QueuedMessage>(16);
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let processing = ProcessingLoop::new(queue_rx, processor, shutdown_rx)
        .with_side_processor(Arc::new(SmtpRelayProcessor::new(
            relay_defaults(),
            config,
            key_extractor,
            Arc::new(LettreMailTransport),
        )));
    let mut events = processing.subscribe();

    if queue_tx.send(Arc::new(email)).await.is_err() {
        eprintln!("Error: processing queue closed unexpectedly");
        std::process::exit(1);
    }
    drop(queue_tx);
    processing.run().await;

    match events.recv().await {
        Ok(event) if event.result.is_success() => {
            eprintln!("Message routed at {}", event.processed_at);
            Ok(())
        }
        Ok(event) => {
            eprintln!(
                "Message processing failed: {}",
                event.result.error().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("Message processing produced no result");
            std::process::exit(1);
        }
    }
}
