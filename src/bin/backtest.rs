use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use ict_poi_backtester::backtesting::BacktestRunner;
use ict_poi_backtester::config::Config;
use ict_poi_backtester::core::annotations::Annotator;
use ict_poi_backtester::core::annotator::ReferenceAnnotator;
use ict_poi_backtester::data::{load_candles, TimeframeStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.to_lowercase()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    // backtest <bars.json> [out_dir]
    let args: Vec<String> = std::env::args().collect();
    let Some(bars_path) = args.get(1) else {
        println!("Usage: backtest <bars.json> [out_dir]");
        return Ok(());
    };
    let out_dir = args.get(2).cloned().unwrap_or_else(|| cfg.log_dir.clone());

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║          ICT POI BACKTESTER                              ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║  Symbol:     {}", cfg.symbol);
    println!("║  Execution:  {}", cfg.execution_tf);
    println!("║  Bias:       {} / {}", cfg.htf_bias_tf, cfg.ltf_bias_tf);
    println!("║  Confirms:   {}-{}", cfg.min_confirmations, cfg.max_confirmations);
    println!("║  Balance:    ${:.2}", cfg.initial_balance);
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let base = load_candles(bars_path).await?;
    if base.is_empty() {
        println!("ERROR: {} contains no bars", bars_path);
        return Ok(());
    }

    // Annotation is a pure per-timeframe transform, so timeframes run in
    // parallel. The simulation itself stays on this thread.
    let base_tf = cfg.timeframes.iter().min().copied().unwrap_or(cfg.execution_tf);
    let annotator = Arc::new(ReferenceAnnotator::from_config(&cfg));
    let mut handles = Vec::new();
    for &tf in &cfg.timeframes {
        let candles = if tf == base_tf {
            base.clone()
        } else {
            base.resample(tf)
        };
        let annotator = Arc::clone(&annotator);
        handles.push(tokio::task::spawn_blocking(move || {
            let annotations = annotator.annotate(tf, &candles);
            (tf, candles, annotations)
        }));
    }

    let mut store = TimeframeStore::new();
    println!("Data loaded:");
    for handle in handles {
        let (tf, candles, annotations) = handle.await.context("annotation task panicked")?;
        println!(
            "  {}: {} bars | {} swings | {} breaks | {} gaps | {} liquidity | {} order blocks",
            tf,
            candles.len(),
            annotations.swings.len(),
            annotations.breaks.len(),
            annotations.gaps.len(),
            annotations.liquidity.len(),
            annotations.order_blocks.len()
        );
        store.insert(tf, candles, annotations)?;
    }
    println!();

    let runner = BacktestRunner::new(store, cfg)?;
    let result = runner.run()?;

    result.report.print_summary();

    let out = Path::new(&out_dir);
    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;
    write_json(&out.join("journal.json"), &result.journal).await?;
    write_json(&out.join("events.json"), &result.events).await?;
    write_json(&out.join("equity.json"), &result.equity_curve).await?;
    write_json(&out.join("zones.json"), &result.zones).await?;
    write_json(&out.join("report.json"), &result.report).await?;
    println!("\nResults saved to: {}", out.display());

    Ok(())
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}
