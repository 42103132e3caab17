use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::models::{Candle, CandleSeries};

/// Read a JSON array of bars (`timestamp`, `open`, `high`, `low`, `close`,
/// optional `volume`). Order is preserved; the store rejects unsorted input.
pub async fn load_candles(path: impl AsRef<Path>) -> Result<CandleSeries> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading bars from {}", path.display()))?;
    let candles = parse_candles(&content)
        .with_context(|| format!("parsing bars from {}", path.display()))?;
    info!("Loaded {} bars from {}", candles.len(), path.display());
    Ok(candles)
}

pub fn parse_candles(json: &str) -> Result<CandleSeries> {
    let candles: Vec<Candle> = serde_json::from_str(json)?;
    Ok(CandleSeries::new(candles))
}
