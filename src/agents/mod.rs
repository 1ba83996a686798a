//! Three specialised analysis agents plus the meta-aggregator that merges them.

pub mod generator;
pub mod meta;
pub mod parse;
pub mod prompt;

pub use generator::{AgentReport, SignalGenerator};
pub use meta::{ConsensusPolicy, Verdict};
pub use parse::{parse_opinion, strip_code_fence};
pub use prompt::build_agent_prompt;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Analytical lens. Agents differ only in the instructions they get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Trend,
    Reversal,
    Volume,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Trend, AgentKind::Reversal, AgentKind::Volume];

    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Trend => "Trend",
            AgentKind::Reversal => "Reversal",
            AgentKind::Volume => "Volume",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
