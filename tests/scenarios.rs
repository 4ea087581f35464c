//! End-to-end scenarios through the public API with scripted providers

use agora::events::CollectingSink;
use agora::gateway::{FallbackMemory, FallbackTable, ProviderGateway};
use agora::orchestrator::JUDGE_UNAVAILABLE_PENALTY;
use agora::provider::{ModelProvider, ModelResponse, QueryConfig, ToolCallRecord};
use agora::research::{CacheKey, InMemoryReportCache, ReportCache, ResearchReport, ResearchRequest};
use agora::{
    classify, ConsensusRequest, Engine, EngineRequest, EngineSettings, Error, ModelChoice,
    ModelSelector, PerformanceTarget, ProviderFamily, Result, Role, SessionStatus, Tier,
    Timeframe, TokenUsage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Script = dyn Fn(&str, &QueryConfig) -> Result<ModelResponse> + Send + Sync;

/// One backend per family, all answering from the same script
struct Scripted {
    family: ProviderFamily,
    script: Arc<Script>,
    calls: Arc<AtomicUsize>,
    models: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ModelProvider for Scripted {
    async fn query(&self, prompt: &str, config: &QueryConfig) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().push(config.model.clone());
        (self.script)(prompt, config)
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn family(&self) -> ProviderFamily {
        self.family
    }

    fn client_type(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    gateway: ProviderGateway,
    calls: Arc<AtomicUsize>,
    models: Arc<Mutex<Vec<String>>>,
}

fn harness<F>(table: FallbackTable, script: F) -> Harness
where
    F: Fn(&str, &QueryConfig) -> Result<ModelResponse> + Send + Sync + 'static,
{
    let script: Arc<Script> = Arc::new(script);
    let calls = Arc::new(AtomicUsize::new(0));
    let models = Arc::new(Mutex::new(Vec::new()));
    let mut gateway = ProviderGateway::new(Arc::new(FallbackMemory::default())).with_fallback_table(table);
    for family in ProviderFamily::ALL {
        gateway = gateway.with_provider(Arc::new(Scripted {
            family,
            script: script.clone(),
            calls: calls.clone(),
            models: models.clone(),
        }));
    }
    Harness {
        gateway,
        calls,
        models,
    }
}

fn engine(gateway: ProviderGateway) -> Engine {
    Engine::new(
        EngineSettings::default(),
        gateway,
        Arc::new(InMemoryReportCache::new(16)),
    )
    .unwrap()
}

fn reply(text: impl Into<String>) -> Result<ModelResponse> {
    Ok(ModelResponse::text(text, TokenUsage::new(120, 80)))
}

fn debate_script(prompt: &str, config: &QueryConfig) -> Result<ModelResponse> {
    if prompt.contains("Synthesize the debate") {
        return reply(
            r#"Here is the synthesis:
```json
{
  "agreements": ["Ryzen 7 laptops with 32GB RAM are the value pick"],
  "disagreements": ["whether a discrete GPU is worth the weight"],
  "conclusion": "ASUS Vivobook Pro 15, Acer Swift X, Lenovo IdeaPad Slim 5",
  "confidence": 78,
  "follow_up_questions": ["Which editing software do you use?"],
}
```"#,
        );
    }
    let text = match config.provider {
        ProviderFamily::Anthropic => "The ASUS Vivobook Pro 15 with an RTX 3050 leads for editing.",
        ProviderFamily::OpenAi => "Acer Swift X gives the best color-accurate screen under budget.",
        _ => "Lenovo IdeaPad Slim 5 with 32GB RAM is the sensible choice for timelines.",
    };
    reply(text)
}

#[tokio::test]
async fn two_round_debate_completes() {
    let h = harness(FallbackTable::empty(), debate_script);
    let engine = engine(h.gateway);
    let sink = Arc::new(CollectingSink::new());
    let request = EngineRequest::new("Best 3 budget laptops for video editing under $1000")
        .with_roles(vec![Role::Analyst, Role::Critic, Role::Synthesizer])
        .with_rounds(2);

    let outcome = engine
        .run(request, Some(sink.clone()), CancellationToken::new())
        .await
        .unwrap();
    let session = outcome.session;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.rounds.len(), 2);
    let synthesis = session.synthesis.as_ref().unwrap();
    assert!(!synthesis.conclusion.is_empty());
    assert!((0.0..=1.0).contains(&synthesis.confidence.value()));
    assert!((synthesis.confidence.value() - 0.78).abs() < 1e-9);
    assert_eq!(synthesis.disagreements.len(), 1);

    let names = sink.names();
    assert_eq!(names.first(), Some(&"round_started"));
    assert_eq!(names.last(), Some(&"debate_completed"));
    let seqs: Vec<u64> = sink.events().iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn research_report_survives_one_failing_specialist() {
    let h = harness(FallbackTable::empty(), |prompt, config| {
        if prompt.contains("\"exists\"") {
            return reply(r#"{"exists": true, "name": "ACME Corp", "summary": "Anvil maker"}"#);
        }
        let system = config.system.clone().unwrap_or_default();
        if system.contains("Risks") {
            return Err(Error::provider(config.provider.as_str(), &config.model, "503 upstream"));
        }
        let calls = if system.contains("Quantitative") { 4 } else { 1 };
        let records = (0..calls)
            .map(|_| ToolCallRecord {
                name: "lookup_context".into(),
                arguments: serde_json::json!({ "section": "index" }),
                success: true,
            })
            .collect();
        Ok(ModelResponse::text("- revenue up 4%", TokenUsage::new(200, 100)).with_tool_calls(records))
    });
    let engine = engine(h.gateway);
    let request = ResearchRequest::new("ACME", Timeframe::Day, Tier::Pro)
        .with_context(serde_json::json!({ "overview": "ACME makes anvils" }));

    let report = engine.research(request, None).await.unwrap();

    assert_eq!(report.results.len(), 4);
    let failed: Vec<_> = report.results.iter().filter(|r| r.is_error()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].findings, "");
    assert!(!failed[0].tools_used);

    let succeeded: u32 = report
        .results
        .iter()
        .filter(|r| !r.is_error())
        .map(|r| r.tool_call_count)
        .sum();
    assert_eq!(report.total_tool_calls, succeeded);
    assert_eq!(report.total_tool_calls, 1 + 1 + 4);
}

fn panel() -> Vec<ModelChoice> {
    vec![
        ModelChoice::new(ProviderFamily::Anthropic, "claude-sonnet-4"),
        ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o"),
        ModelChoice::new(ProviderFamily::Google, "gemini-2.5-pro"),
        ModelChoice::new(ProviderFamily::Groq, "llama-3.3-70b-versatile"),
        ModelChoice::new(ProviderFamily::Mistral, "mistral-large-latest"),
    ]
}

#[tokio::test]
async fn judge_failure_penalises_plurality() {
    let h = harness(FallbackTable::empty(), |_, config| match config.provider {
        ProviderFamily::DeepSeek => Err(Error::provider("deepseek", &config.model, "judge down")),
        ProviderFamily::Groq | ProviderFamily::Mistral => {
            reply(r#"{"action": "HOLD", "confidence": 0.6, "reasoning": "priced in"}"#)
        }
        _ => reply("```json\n{\"action\": \"BUY\", \"confidence\": 0.7, \"reasoning\": \"cheap\",}\n```"),
    });
    let engine = engine(h.gateway);
    let request = ConsensusRequest::new(
        "Should I buy ACME?",
        ModelChoice::new(ProviderFamily::DeepSeek, "deepseek-chat"),
        Tier::Pro,
    )
    .with_labels(["BUY", "SELL", "HOLD"]);

    let result = engine.consensus(&request, &panel()).await.unwrap();

    let expected: BTreeMap<String, usize> = [("BUY".to_string(), 3), ("HOLD".to_string(), 2)].into();
    assert_eq!(result.votes, expected);
    assert_eq!(result.unified_answer, "BUY");
    assert!(!result.judge_available);
    assert!((result.confidence.value() - (0.6 - JUDGE_UNAVAILABLE_PENALTY)).abs() < 1e-9);
    assert!(result.explanation.contains("Judge unavailable"));
}

#[test]
fn classification_is_deterministic() {
    let query = "Compare the latest Ryzen vs Intel laptops for compiling Rust, step by step";
    let first = classify(query);
    for _ in 0..10 {
        assert_eq!(classify(query), first);
    }
}

#[tokio::test]
async fn rounds_are_numbered_without_gaps() {
    let h = harness(FallbackTable::empty(), debate_script);
    let engine = engine(h.gateway);
    let request = EngineRequest::new("Is a mechanical keyboard worth it for programmers?").with_rounds(3);

    let session = engine
        .run(request, None, CancellationToken::new())
        .await
        .unwrap()
        .session;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.rounds.len(), 3);
    for (i, round) in session.rounds.iter().enumerate() {
        assert_eq!(round.round_number as usize, i + 1);
        assert_eq!(round.responses.len(), 3);
    }
}

#[tokio::test]
async fn votes_sum_to_counted_verdicts() {
    let h = harness(FallbackTable::empty(), |_, config| match config.provider {
        ProviderFamily::Groq => reply("I cannot decide without more data."),
        ProviderFamily::Mistral => reply(r#"{"action": "MAYBE"}"#),
        ProviderFamily::Xai => reply(
            r#"{"recommendation": "SELL", "confidence": 0.9, "explanation": "Two BUY votes are thin."}"#,
        ),
        _ => reply(r#"{"action": "sell", "confidence": "80%"}"#),
    });
    let engine = engine(h.gateway);
    let request = ConsensusRequest::new(
        "Should I buy ACME?",
        ModelChoice::new(ProviderFamily::Xai, "grok-3"),
        Tier::Pro,
    )
    .with_labels(["BUY", "SELL", "HOLD"]);

    let result = engine.consensus(&request, &panel()).await.unwrap();

    assert_eq!(result.verdicts.len(), 5);
    assert_eq!(result.abstentions(), 2);
    assert_eq!(result.votes.values().sum::<usize>(), 3);
    assert_eq!(result.counted(), result.verdicts.iter().filter(|v| !v.is_abstained()).count());
    assert_eq!(result.unified_answer, "SELL");
    assert!(result.judge_available);
}

#[tokio::test(start_paused = true)]
async fn cache_returns_what_was_set_until_ttl() {
    let cache = InMemoryReportCache::new(4);
    let key = CacheKey::new("acme", Timeframe::Day);
    let report = Arc::new(ResearchReport {
        subject: "ACME".into(),
        canonical_name: "ACME Corp".into(),
        summary: "Anvils".into(),
        timeframe: Timeframe::Day,
        results: Vec::new(),
        total_tool_calls: 0,
        duration_ms: 12,
        created_at: chrono::Utc::now(),
    });

    cache.set(key.clone(), report.clone(), Duration::from_secs(60)).await;
    let hit = cache.get(&CacheKey::new(" ACME ", Timeframe::Day)).await.unwrap();
    assert_eq!(*hit, *report);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(cache.get(&key).await.is_none());
}

#[tokio::test]
async fn at_most_one_fallback_hop() {
    let table = FallbackTable::empty().with_chain(
        "gpt-4o",
        vec![
            ModelChoice::new(ProviderFamily::Anthropic, "claude-sonnet-4"),
            ModelChoice::new(ProviderFamily::Google, "gemini-2.5-pro"),
        ],
    );
    let h = harness(table, |_, config| {
        Err(Error::provider(config.provider.as_str(), &config.model, "overloaded"))
    });
    let config = QueryConfig::new(&ModelChoice::new(ProviderFamily::OpenAi, "gpt-4o"));

    let err = h.gateway.query("hello", &config, Tier::Pro).await.unwrap_err();
    assert!(matches!(err, Error::Provider { .. }));
    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    assert_eq!(*h.models.lock(), vec!["gpt-4o".to_string(), "claude-sonnet-4".to_string()]);

    // subscription billing never falls back
    let err = h.gateway.query("hello", &config, Tier::Subscription).await.unwrap_err();
    assert!(matches!(err, Error::Provider { .. }));
    assert_eq!(h.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn confidence_is_always_a_unit_interval() {
    let analysis = classify("Which stock should I buy this quarter: NVDA or AMD?");
    assert!((0.0..=1.0).contains(&analysis.confidence.value()));

    let plan = ModelSelector::new()
        .select(
            &analysis,
            &[Role::Analyst, Role::Critic, Role::Analyst, Role::Synthesizer],
            Tier::Free,
            PerformanceTarget::Cost,
        )
        .unwrap();
    assert!(plan
        .recommendations
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.confidence.value())));

    // percentages reported by models are converted at the parsing boundary
    let h = harness(FallbackTable::empty(), |_, _| {
        reply(r#"{"action": "BUY", "confidence": 85, "reasoning": "momentum"}"#)
    });
    let engine = engine(h.gateway);
    let request = ConsensusRequest::new("Buy NVDA?", ModelChoice::new(ProviderFamily::Xai, "grok-3"), Tier::Pro)
        .with_labels(["BUY", "SELL", "HOLD"]);
    let result = engine.consensus(&request, &panel()[..2]).await.unwrap();
    assert!(result
        .verdicts
        .iter()
        .all(|v| (v.confidence.value() - 0.85).abs() < 1e-9));
    assert!((0.0..=1.0).contains(&result.confidence.value()));
}

#[tokio::test]
async fn validation_rejects_before_any_call() {
    let h = harness(FallbackTable::empty(), debate_script);
    let calls = h.calls.clone();
    let engine = engine(h.gateway);

    let err = engine
        .run(EngineRequest::new("   "), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = engine
        .run(
            EngineRequest::new("Pick a laptop").with_rounds(9),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn research_never_runs_for_an_invalid_debate() {
    let h = harness(FallbackTable::empty(), debate_script);
    let calls = h.calls.clone();
    let engine = engine(h.gateway);
    let researched = || {
        EngineRequest::new("Should I buy ACME shares this quarter?").with_research(
            "ACME",
            Timeframe::Week,
            serde_json::json!({ "overview": "ACME makes anvils" }),
        )
    };

    for request in [
        researched().with_rounds(0),
        researched().with_rounds(9),
        researched().with_roles(vec![Role::Analyst]),
    ] {
        let err = engine
            .run(request, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Accepts every call and never answers
struct Stalled {
    family: ProviderFamily,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelProvider for Stalled {
    async fn query(&self, _prompt: &str, _config: &QueryConfig) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn family(&self) -> ProviderFamily {
        self.family
    }

    fn client_type(&self) -> &str {
        "stalled"
    }
}

fn stalled(settings: EngineSettings) -> (Engine, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut gateway =
        ProviderGateway::new(Arc::new(FallbackMemory::default())).with_fallback_table(FallbackTable::empty());
    for family in ProviderFamily::ALL {
        gateway = gateway.with_provider(Arc::new(Stalled {
            family,
            calls: calls.clone(),
        }));
    }
    let engine = Engine::new(settings, gateway, Arc::new(InMemoryReportCache::new(4))).unwrap();
    (engine, calls)
}

fn research_request() -> EngineRequest {
    EngineRequest::new("Should I buy ACME shares?")
        .with_rounds(1)
        .with_research("ACME", Timeframe::Day, serde_json::Value::Null)
}

#[tokio::test]
async fn cancelling_during_research_ends_the_run() {
    let (engine, calls) = stalled(EngineSettings::default());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), engine.run(research_request(), None, cancel))
        .await
        .expect("cancellation must end the run")
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_research_backend_hits_the_session_budget() {
    let settings = EngineSettings {
        session_timeout_secs: 2,
        ..EngineSettings::default()
    };
    let (engine, calls) = stalled(settings);

    let err = engine
        .run(research_request(), None, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
