use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::generator::AgentReport;
use super::prompt::{OUTPUT_CONTRACT, OUTPUT_RULES};
use crate::models::{Direction, TradeOpinion};
use crate::Result;

/// Consensus thresholds. The same numbers are written into the meta prompt
/// and used to audit the meta answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    /// Every agent agrees and each is strictly above this.
    pub unanimous_min: u8,
    /// Two agree and their average is strictly above this.
    pub majority_avg_min: f64,
    /// A single agent strictly above this may carry the trade alone.
    pub lone_min: u8,
    /// An opposing agent at or above this blocks majority and lone trades.
    pub strong_opposition: u8,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            unanimous_min: 60,
            majority_avg_min: 70.0,
            lone_min: 90,
            strong_opposition: 70,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Unanimous { direction: Direction, confidence: f64 },
    Majority { direction: Direction, confidence: f64 },
    LoneConviction { direction: Direction, confidence: u8 },
    NoTrade { leaning: Direction, reason: String },
}

impl Verdict {
    pub fn direction(&self) -> Direction {
        match self {
            Verdict::Unanimous { direction, .. }
            | Verdict::Majority { direction, .. }
            | Verdict::LoneConviction { direction, .. } => *direction,
            Verdict::NoTrade { leaning, .. } => *leaning,
        }
    }

    pub fn takes_trade(&self) -> bool {
        !matches!(self, Verdict::NoTrade { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Verdict::Unanimous { direction, confidence } => format!(
                "all agents agree on {} (average confidence {:.1})",
                direction, confidence
            ),
            Verdict::Majority { direction, confidence } => format!(
                "two agents agree on {} (average confidence {:.1}) with no strong opposition",
                direction, confidence
            ),
            Verdict::LoneConviction { direction, confidence } => format!(
                "one agent is extremely confident in {} ({}) and nobody strongly opposes",
                direction, confidence
            ),
            Verdict::NoTrade { leaning, reason } => {
                format!("no trade ({}); more probable direction {}", reason, leaning)
            }
        }
    }
}

impl ConsensusPolicy {
    pub fn evaluate(&self, opinions: &[TradeOpinion]) -> Verdict {
        if opinions.is_empty() {
            return Verdict::NoTrade {
                leaning: Direction::Long,
                reason: "no agent opinions".to_string(),
            };
        }

        let first = opinions[0].direction;
        if opinions
            .iter()
            .all(|o| o.direction == first && o.confidence > self.unanimous_min)
        {
            return Verdict::Unanimous {
                direction: first,
                confidence: average(opinions.iter().map(|o| o.confidence)),
            };
        }

        for direction in [Direction::Long, Direction::Short] {
            let mut agreeing: Vec<u8> = opinions
                .iter()
                .filter(|o| o.direction == direction)
                .map(|o| o.confidence)
                .collect();
            if agreeing.len() < 2 {
                continue;
            }
            agreeing.sort_unstable_by(|a, b| b.cmp(a));
            let avg = average(agreeing.iter().take(2).copied());
            if avg > self.majority_avg_min && !self.strongly_opposed(opinions, direction) {
                return Verdict::Majority {
                    direction,
                    confidence: avg,
                };
            }
        }

        if let Some(lone) = opinions.iter().max_by_key(|o| o.confidence) {
            if lone.confidence > self.lone_min && !self.strongly_opposed(opinions, lone.direction) {
                return Verdict::LoneConviction {
                    direction: lone.direction,
                    confidence: lone.confidence,
                };
            }
        }

        Verdict::NoTrade {
            leaning: leaning(opinions),
            reason: "no consensus among agents".to_string(),
        }
    }

    fn strongly_opposed(&self, opinions: &[TradeOpinion], direction: Direction) -> bool {
        opinions
            .iter()
            .any(|o| o.direction != direction && o.confidence >= self.strong_opposition)
    }

    /// Reconcile the meta answer with the local verdict.
    ///
    /// The meta answer is authoritative. Actionable answers must carry a
    /// consistent bracket, and their risk/reward is recomputed from prices.
    pub fn finalize(&self, mut meta: TradeOpinion, verdict: &Verdict) -> Result<TradeOpinion> {
        if meta.is_actionable() {
            meta.validate_prices()?;
            if let Some(rr) = meta.computed_risk_reward() {
                meta.risk_reward = rr;
            }
        }

        let agrees = match (verdict.takes_trade(), meta.is_actionable()) {
            (true, true) => verdict.direction() == meta.direction,
            (false, false) => true,
            _ => false,
        };
        if agrees {
            info!(
                "Meta decision {} {} (confidence {}) matches local consensus",
                meta.direction,
                if meta.is_actionable() { "trade" } else { "no-trade" },
                meta.confidence
            );
        } else {
            warn!(
                "Meta decision {} confidence {} disagrees with local consensus: {}",
                meta.direction,
                meta.confidence,
                verdict.describe()
            );
        }
        Ok(meta)
    }
}

fn average(values: impl Iterator<Item = u8>) -> f64 {
    let (sum, n) = values.fold((0u32, 0u32), |(s, n), v| (s + v as u32, n + 1));
    if n == 0 {
        0.0
    } else {
        sum as f64 / n as f64
    }
}

/// Direction with the larger total confidence; ties go to the single most
/// confident agent.
fn leaning(opinions: &[TradeOpinion]) -> Direction {
    let total = |d: Direction| -> u32 {
        opinions
            .iter()
            .filter(|o| o.direction == d)
            .map(|o| o.confidence as u32)
            .sum()
    };
    let (long, short) = (total(Direction::Long), total(Direction::Short));
    if long > short {
        Direction::Long
    } else if short > long {
        Direction::Short
    } else {
        opinions
            .iter()
            .max_by_key(|o| o.confidence)
            .map(|o| o.direction)
            .unwrap_or(Direction::Long)
    }
}

/// Instructions for the aggregation call: consensus rules, the three raw
/// agent answers and the output contract.
pub fn build_meta_prompt(
    symbol: &str,
    reports: &[AgentReport],
    policy: &ConsensusPolicy,
    verdict: &Verdict,
) -> String {
    let mut prompt = format!(
        r#"You are the Meta-Agent. You receive the JSON outputs of {n} specialized agents. Aggregate their recommendations and output a FINAL trading signal for {symbol} as JSON (same format as the agents).

Rules:
- If all agents agree (same direction, confidence > {u}), take the trade.
- If 2 of 3 agree, take the trade if their average confidence > {m} and there is no major contradiction in "thoughts".
- If there is no consensus, only trade if one agent is extremely confident (confidence > {l}) and the others are not strongly opposed.
- If there is no valid setup, output confidence 0 and explain why in "thoughts".

In "thoughts", write a paragraph-style summary of the agents' reasoning and justify why the chosen direction and prices beat the alternatives.

Pre-check computed from the agent confidences: {verdict}.

"#,
        n = reports.len(),
        symbol = symbol,
        u = policy.unanimous_min,
        m = policy.majority_avg_min,
        l = policy.lone_min,
        verdict = verdict.describe(),
    );

    for report in reports {
        prompt.push_str(&format!("{} Agent JSON:\n{}\n\n", report.kind, report.raw));
    }

    prompt.push_str(&OUTPUT_CONTRACT.replace("<symbol>", symbol));
    prompt.push('\n');
    prompt.push_str(OUTPUT_RULES);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentKind;
    use crate::TradeError;

    fn op(direction: Direction, confidence: u8) -> TradeOpinion {
        TradeOpinion {
            symbol: None,
            direction,
            entry: 100.0,
            stop_loss: if direction == Direction::Long { 95.0 } else { 105.0 },
            take_profit: if direction == Direction::Long { 110.0 } else { 90.0 },
            risk_reward: 0.0,
            confidence,
            thoughts: String::new(),
        }
    }

    #[test]
    fn test_two_of_three_selects_majority() {
        let verdict = ConsensusPolicy::default().evaluate(&[
            op(Direction::Long, 80),
            op(Direction::Long, 75),
            op(Direction::Short, 40),
        ]);
        assert_eq!(
            verdict,
            Verdict::Majority {
                direction: Direction::Long,
                confidence: 77.5
            }
        );
    }

    #[test]
    fn test_unanimous_needs_every_agent_above_threshold() {
        let policy = ConsensusPolicy::default();
        let ok = policy.evaluate(&[
            op(Direction::Short, 61),
            op(Direction::Short, 65),
            op(Direction::Short, 70),
        ]);
        assert!(matches!(ok, Verdict::Unanimous { direction: Direction::Short, .. }));

        let weak = policy.evaluate(&[
            op(Direction::Short, 60),
            op(Direction::Short, 62),
            op(Direction::Short, 65),
        ]);
        assert!(matches!(weak, Verdict::NoTrade { leaning: Direction::Short, .. }));
    }

    #[test]
    fn test_strong_opposition_blocks_majority() {
        let verdict = ConsensusPolicy::default().evaluate(&[
            op(Direction::Long, 85),
            op(Direction::Long, 80),
            op(Direction::Short, 75),
        ]);
        assert!(matches!(verdict, Verdict::NoTrade { leaning: Direction::Long, .. }));
    }

    #[test]
    fn test_lone_conviction() {
        let policy = ConsensusPolicy::default();
        let lone = policy.evaluate(&[
            op(Direction::Short, 95),
            op(Direction::Long, 30),
            op(Direction::Long, 20),
        ]);
        assert_eq!(
            lone,
            Verdict::LoneConviction {
                direction: Direction::Short,
                confidence: 95
            }
        );

        let opposed = policy.evaluate(&[
            op(Direction::Short, 95),
            op(Direction::Long, 70),
            op(Direction::Long, 20),
        ]);
        assert!(!opposed.takes_trade());
    }

    #[test]
    fn test_finalize_recomputes_risk_reward() {
        let policy = ConsensusPolicy::default();
        let verdict = Verdict::Majority {
            direction: Direction::Long,
            confidence: 77.5,
        };
        let mut meta = op(Direction::Long, 78);
        meta.risk_reward = 9.9;
        let out = policy.finalize(meta, &verdict).unwrap();
        assert_eq!(out.risk_reward, 2.0);
    }

    #[test]
    fn test_finalize_rejects_inconsistent_bracket() {
        let policy = ConsensusPolicy::default();
        let mut meta = op(Direction::Long, 78);
        meta.stop_loss = 120.0;
        let err = policy
            .finalize(meta, &Verdict::NoTrade { leaning: Direction::Long, reason: String::new() })
            .unwrap_err();
        assert!(matches!(err, TradeError::MalformedOutput(_)));
    }

    #[test]
    fn test_finalize_accepts_zero_confidence_placeholder() {
        let mut meta = op(Direction::Short, 0);
        meta.entry = 0.0;
        meta.stop_loss = 0.0;
        meta.take_profit = 0.0;
        let verdict = Verdict::NoTrade {
            leaning: Direction::Short,
            reason: "none".to_string(),
        };
        let out = ConsensusPolicy::default().finalize(meta, &verdict).unwrap();
        assert_eq!(out.confidence, 0);
        assert_eq!(out.direction, Direction::Short);
    }

    #[test]
    fn test_meta_prompt_embeds_agent_answers_in_order() {
        let reports: Vec<AgentReport> = AgentKind::ALL
            .iter()
            .map(|&kind| AgentReport {
                kind,
                raw: format!("{{\"agent\":\"{}\"}}", kind),
                opinion: op(Direction::Long, 70),
            })
            .collect();
        let policy = ConsensusPolicy::default();
        let verdict = policy.evaluate(&[]);
        let prompt = build_meta_prompt("BTCUSDT", &reports, &policy, &verdict);

        let t = prompt.find("Trend Agent JSON:\n{\"agent\":\"Trend\"}").unwrap();
        let r = prompt.find("Reversal Agent JSON:").unwrap();
        let v = prompt.find("Volume Agent JSON:").unwrap();
        assert!(t < r && r < v);
        assert!(prompt.contains("confidence > 60"));
        assert!(prompt.contains("\"symbol\": \"BTCUSDT\""));
    }
}
