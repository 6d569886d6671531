//! Tether CLI
//!
//! Smoke-test client for a tether relay: probes the endpoint, then streams
//! one chat turn and prints tokens as they arrive.
//!
//! # Usage
//!
//! ```bash
//! # Probe and chat against a configured endpoint
//! TETHER_ENDPOINT=http://localhost:8000 tether-cli "Why is the sky blue?"
//!
//! # With verbose logging
//! RUST_LOG=debug tether-cli "Hello"
//! ```
//!
//! # Environment Variables
//!
//! - `TETHER_ENDPOINT`: Relay base URL (also settable in the config file)
//! - `TETHER_PROVIDER`: Provider hint forwarded to the relay
//! - `TETHER_SYSTEM_PROMPT`: Override the system instruction
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use std::io::Write;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_core::{ClientConfig, ConnectionStatus, HealthProber, SessionUpdate, StreamSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let prompt = std::env::args()
        .nth(1)
        .context("usage: tether-cli <message>")?;

    let config = ClientConfig::load().context("failed to load configuration")?;

    let prober = HealthProber::new();
    match prober.probe(config.endpoint.as_deref()).await {
        ConnectionStatus::Connected { model } => {
            info!(%model, "relay reachable");
        }
        ConnectionStatus::NotConfigured => {
            anyhow::bail!("no relay endpoint configured (set TETHER_ENDPOINT)");
        }
        ConnectionStatus::Error => {
            anyhow::bail!(
                "relay at {} did not answer the health probe",
                config.endpoint.as_deref().unwrap_or_default()
            );
        }
    }

    let session = StreamSession::new(config);
    let mut handle = session.send(prompt, &[])?;

    let mut printed = 0usize;
    let mut stdout = std::io::stdout();
    while let Some(update) = handle.recv().await {
        match update {
            SessionUpdate::Partial { text } => {
                // Updates carry the full text so far; print only the new tail
                write!(stdout, "{}", &text[printed..])?;
                stdout.flush()?;
                printed = text.len();
            }
            SessionUpdate::Usage(usage) => {
                info!(?usage, "usage reported");
            }
            SessionUpdate::Finished(outcome) => {
                let text = outcome.display_text();
                writeln!(stdout, "{}", &text[printed.min(text.len())..])?;
                if let Some(error) = &outcome.error {
                    info!(%error, "session ended with error");
                }
                break;
            }
        }
    }

    Ok(())
}
