//! Run one debate against whichever providers have keys in the environment

use agora::prelude::*;
use agora::events::ChannelSink;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agora::telemetry::init_tracing(TelemetryFormat::Text)?;

    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Which laptop under $800 is best for a CS student?".to_string());

    let settings = EngineSettings::load(None)?;
    let engine = Engine::from_settings(settings)?;
    println!("Configured providers: {:?}", engine.gateway().configured_families());

    let (sink, mut events) = ChannelSink::new(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("  [{:>3}] {}", event.seq, event.kind.name());
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let request = EngineRequest::new(query)
        .with_response_length(ResponseLength::Concise)
        .with_auto_extra_round();
    let outcome = engine.run(request, Some(Arc::new(sink)), cancel).await?;
    // drain whatever is still buffered
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    let session = &outcome.session;
    println!("\nStatus: {:?} after {} round(s)", session.status, session.round_count());
    for round in &session.rounds {
        println!(
            "Round {}: disagreement {:.2}",
            round.round_number,
            round.disagreement.unwrap_or_default()
        );
    }
    if let Some(synthesis) = &session.synthesis {
        println!("\nConclusion: {}", synthesis.conclusion);
        println!("Confidence: {}", synthesis.confidence);
        for point in &synthesis.disagreements {
            println!("  still contested: {}", point);
        }
    }
    if let Some(error) = &session.error {
        println!("\nEnded with {}: {}", error.kind, error.message);
    }
    println!(
        "\nTokens: {}  Estimated cost: ${:.4}  Wall time: {}ms",
        session.total_tokens.total, session.total_cost, outcome.duration_ms
    );
    Ok(())
}
