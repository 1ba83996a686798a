use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::meta::{build_meta_prompt, ConsensusPolicy};
use super::parse::{parse_opinion, strip_code_fence};
use super::prompt::build_agent_prompt;
use super::AgentKind;
use crate::api::TextGenerator;
use crate::market::{MarketSnapshot, SnapshotBuilder, Timeframe};
use crate::models::{TradeOpinion, TradingSignal};
use crate::{Result, TradeError};

/// One agent's answer: the cleaned JSON text (forwarded verbatim to the
/// meta-aggregator) and its parsed form.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub kind: AgentKind,
    pub raw: String,
    pub opinion: TradeOpinion,
}

pub struct SignalGenerator {
    snapshots: SnapshotBuilder,
    llm: Arc<dyn TextGenerator>,
    policy: ConsensusPolicy,
    call_timeout: Duration,
    default_leverage: u32,
}

impl SignalGenerator {
    pub fn new(
        snapshots: SnapshotBuilder,
        llm: Arc<dyn TextGenerator>,
        call_timeout: Duration,
        default_leverage: u32,
    ) -> Self {
        Self {
            snapshots,
            llm,
            policy: ConsensusPolicy::default(),
            call_timeout,
            default_leverage,
        }
    }

    pub fn with_policy(mut self, policy: ConsensusPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn snapshots(&self) -> &SnapshotBuilder {
        &self.snapshots
    }

    /// Snapshot, three concurrent agents, then the meta-aggregator.
    ///
    /// Any agent failure fails the whole request. Nothing is retried here.
    pub async fn generate(
        &self,
        symbol: &str,
        model: &str,
        timeframes: &[Timeframe],
    ) -> Result<TradingSignal> {
        if !self.llm.is_configured() {
            return Err(TradeError::Unconfigured("OpenAI API key".to_string()));
        }

        let snapshot = Arc::new(self.snapshots.build(symbol, timeframes).await?);

        info!(symbol = %symbol, model = %model, "Running analysis agents");
        let trend = self.spawn_agent(AgentKind::Trend, &snapshot, model);
        let reversal = self.spawn_agent(AgentKind::Reversal, &snapshot, model);
        let volume = self.spawn_agent(AgentKind::Volume, &snapshot, model);

        let (trend, reversal, volume) =
            tokio::try_join!(join_agent(trend), join_agent(reversal), join_agent(volume))?;
        let reports = [trend, reversal, volume];

        for r in &reports {
            debug!(
                symbol = %symbol,
                "{} agent: {} confidence {}",
                r.kind,
                r.opinion.direction,
                r.opinion.confidence
            );
        }

        let opinions: Vec<TradeOpinion> = reports.iter().map(|r| r.opinion.clone()).collect();
        let verdict = self.policy.evaluate(&opinions);
        let prompt = build_meta_prompt(symbol, &reports, &self.policy, &verdict);

        let raw = call_with_timeout(self.llm.as_ref(), model, &prompt, self.call_timeout, "Meta").await?;
        let meta = parse_opinion(&raw)?;
        let meta = self.policy.finalize(meta, &verdict)?;

        // Request order, first occurrence wins.
        let mut analyzed: Vec<String> = Vec::with_capacity(timeframes.len());
        for tf in timeframes {
            let tf = tf.to_string();
            if !analyzed.contains(&tf) {
                analyzed.push(tf);
            }
        }

        let signal = TradingSignal::from_opinion(
            meta,
            symbol,
            model,
            self.default_leverage,
            analyzed,
        );
        info!(
            symbol = %symbol,
            "Generated {} signal with confidence {}",
            signal.direction,
            signal.confidence
        );
        Ok(signal)
    }

    fn spawn_agent(
        &self,
        kind: AgentKind,
        snapshot: &Arc<MarketSnapshot>,
        model: &str,
    ) -> JoinHandle<Result<AgentReport>> {
        let llm = Arc::clone(&self.llm);
        let snapshot = Arc::clone(snapshot);
        let model = model.to_string();
        let call_timeout = self.call_timeout;

        tokio::spawn(async move {
            let prompt = build_agent_prompt(kind, &snapshot);
            let raw = call_with_timeout(llm.as_ref(), &model, &prompt, call_timeout, kind.name()).await?;
            let opinion = parse_opinion(&raw).map_err(|e| match e {
                TradeError::MalformedOutput(msg) => {
                    TradeError::MalformedOutput(format!("{} agent: {}", kind, msg))
                }
                other => other,
            })?;
            Ok(AgentReport {
                kind,
                raw: strip_code_fence(&raw).to_string(),
                opinion,
            })
        })
    }
}

async fn call_with_timeout(
    llm: &dyn TextGenerator,
    model: &str,
    prompt: &str,
    limit: Duration,
    label: &str,
) -> Result<String> {
    tokio::time::timeout(limit, llm.complete(model, prompt))
        .await
        .map_err(|_| TradeError::Timeout(format!("{} agent call after {:?}", label, limit)))?
}

async fn join_agent(handle: JoinHandle<Result<AgentReport>>) -> Result<AgentReport> {
    handle
        .await
        .map_err(|e| TradeError::Upstream(format!("agent task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MarketData;
    use crate::models::{Candle, Direction, PriceTicker, SignalStatus, SymbolConstraints};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlatMarket;

    #[async_trait]
    impl MarketData for FlatMarket {
        async fn current_price(&self, _symbol: &str) -> Result<PriceTicker> {
            Ok(PriceTicker {
                price: 100.0,
                change_24h: 0.0,
                volume: 0.0,
            })
        }

        async fn candles(&self, _symbol: &str, _tf: Timeframe, limit: usize) -> Result<Vec<Candle>> {
            Ok((0..limit)
                .map(|i| Candle::new(i as i64, 100.0, 101.0, 99.0, 100.0, 1.0, 1))
                .collect())
        }

        async fn symbol_constraints(&self, _symbol: &str) -> Result<SymbolConstraints> {
            Ok(SymbolConstraints {
                step_size: 0.001,
                min_quantity: 0.001,
            })
        }
    }

    /// Answers by lens, recognised from the prompt preamble.
    struct ScriptedLlm {
        configured: bool,
        calls: AtomicUsize,
        reversal: &'static str,
        meta: &'static str,
        stall_volume: bool,
    }

    impl ScriptedLlm {
        fn new() -> Self {
            Self {
                configured: true,
                calls: AtomicUsize::new(0),
                reversal: r#"{"direction":"SHORT","entry":100,"sl":104,"tp":92,"rr":2,"confidence":40,"thoughts":"weak"}"#,
                meta: "```json\n{\"symbol\":\"BTCUSDT\",\"direction\":\"LONG\",\"entry\":100,\"sl\":95,\"tp\":110,\"rr\":1.1,\"confidence\":78,\"thoughts\":\"two agree\"}\n```",
                stall_volume: false,
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedLlm {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn complete(&self, _model: &str, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.starts_with("You are the Trend Agent") {
                Ok(r#"{"direction":"LONG","entry":100,"sl":95,"tp":110,"rr":2,"confidence":80,"thoughts":"hh/hl"}"#.to_string())
            } else if prompt.starts_with("You are the Reversal Agent") {
                Ok(self.reversal.to_string())
            } else if prompt.starts_with("You are the Volume") {
                if self.stall_volume {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok("```json\n{\"direction\":\"LONG\",\"entry\":100,\"sl\":96,\"tp\":108,\"rr\":2,\"confidence\":75,\"thoughts\":\"spike\"}\n```".to_string())
            } else {
                assert!(prompt.contains("Trend Agent JSON:"));
                Ok(self.meta.to_string())
            }
        }
    }

    fn generator(llm: ScriptedLlm, timeout: Duration) -> (SignalGenerator, Arc<ScriptedLlm>) {
        let llm = Arc::new(llm);
        let builder = SnapshotBuilder::new(Arc::new(FlatMarket), 70, 35);
        (
            SignalGenerator::new(builder, llm.clone(), timeout, 20),
            llm,
        )
    }

    #[tokio::test]
    async fn test_generate_majority_long() {
        let (gen, llm) = generator(ScriptedLlm::new(), Duration::from_secs(5));
        let signal = gen
            .generate("BTCUSDT", "gpt-4o", &[Timeframe::H1, Timeframe::M15])
            .await
            .unwrap();

        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.status, SignalStatus::Active);
        assert_eq!(signal.leverage, 20);
        assert_eq!(signal.risk_reward, 2.0);
        assert_eq!(signal.model_used, "gpt-4o");
        assert_eq!(signal.timeframes_analyzed, vec!["1h", "15m"]);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_timeframes_analyzed_keeps_request_order() {
        let (gen, _) = generator(ScriptedLlm::new(), Duration::from_secs(5));
        let signal = gen
            .generate(
                "BTCUSDT",
                "gpt-4o",
                &[Timeframe::H4, Timeframe::M15, Timeframe::H4, Timeframe::H1],
            )
            .await
            .unwrap();
        assert_eq!(signal.timeframes_analyzed, vec!["4h", "15m", "1h"]);
    }

    #[tokio::test]
    async fn test_malformed_agent_fails_generation() {
        let mut scripted = ScriptedLlm::new();
        scripted.reversal = "Sorry, I cannot help with that";
        let (gen, _) = generator(scripted, Duration::from_secs(5));
        let err = gen.generate("BTCUSDT", "gpt-4o", &[Timeframe::H1]).await.unwrap_err();
        assert!(matches!(err, TradeError::MalformedOutput(ref m) if m.starts_with("Reversal agent")));
    }

    #[tokio::test]
    async fn test_agent_timeout_fails_generation() {
        let mut scripted = ScriptedLlm::new();
        scripted.stall_volume = true;
        let (gen, _) = generator(scripted, Duration::from_millis(50));
        let err = gen.generate("BTCUSDT", "gpt-4o", &[Timeframe::H1]).await.unwrap_err();
        assert!(matches!(err, TradeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_reasoning_is_rejected() {
        let mut scripted = ScriptedLlm::new();
        scripted.configured = false;
        let (gen, llm) = generator(scripted, Duration::from_secs(5));
        let err = gen.generate("BTCUSDT", "gpt-4o", &[Timeframe::H1]).await.unwrap_err();
        assert!(matches!(err, TradeError::Unconfigured(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inconsistent_meta_bracket_is_malformed() {
        let mut scripted = ScriptedLlm::new();
        scripted.meta = r#"{"direction":"LONG","entry":100,"sl":105,"tp":110,"rr":2,"confidence":70,"thoughts":"x"}"#;
        let (gen, _) = generator(scripted, Duration::from_secs(5));
        let err = gen.generate("BTCUSDT", "gpt-4o", &[Timeframe::H1]).await.unwrap_err();
        assert!(matches!(err, TradeError::MalformedOutput(_)));
    }
}
