//! Register a series with the AT test endpoint.
//!
//! ```sh
//! AT_USERNAME=501442600/1 AT_PASSWORD=... AT_PUBLIC_KEY=at_public_key.pem \
//!     cargo run --example register_series --features at
//! ```

use fatura::at::AtSeriesClient;
use fatura::audit::AuditTrail;
use fatura::core::*;
use fatura::series::{FiscalSeries, register_series_with_authority};
use fatura::settings::AtConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = AtConfig::new(
        AtConfig::TEST_ENDPOINT,
        std::env::var("AT_USERNAME")?,
        std::env::var("AT_PASSWORD")?,
    );
    config.public_key_pem = Some(std::fs::read_to_string(std::env::var("AT_PUBLIC_KEY")?)?);
    let client = AtSeriesClient::new(config)?;

    let registry = fatura::series::SeriesRegistry::new();
    let key = SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024");
    registry.register(FiscalSeries::new(key.clone()))?;

    let (audit, log) = AuditTrail::in_memory();
    match register_series_with_authority(&registry, &key, &client, &audit, "9999", "demo").await {
        Ok(code) => println!("Validation code: {code}"),
        Err(e) => println!("Registration failed: {e}"),
    }

    let series = registry.snapshot(&key)?;
    println!("Status: {:?}", series.status());
    for entry in log.entries() {
        println!("  [{}] {} {}", entry.event_type.as_str(), entry.reference_id, entry.details);
    }
    Ok(())
}
