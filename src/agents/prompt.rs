use super::AgentKind;
use crate::market::MarketSnapshot;

/// JSON shape every agent (and the meta-aggregator) must answer with.
pub(crate) const OUTPUT_CONTRACT: &str = r#"Output ONLY valid, well-formatted JSON in this structure, DON'T USE MARKDOWN OR ANY OTHER FORMAT:
{
  "symbol": "<symbol>",
  "direction": "LONG" or "SHORT",
  "entry": <entry_price_number>,
  "sl": <stop_loss_price_number>,
  "tp": <take_profit_price_number>,
  "rr": <risk_reward_ratio_number>,
  "confidence": <confidence_0_to_100>,
  "thoughts": "<Detailed, structured technical analysis and reasoning for this trade recommendation>"
}
"#;

/// Rules shared by the agents and the meta-aggregator.
pub(crate) const OUTPUT_RULES: &str = r#"Rules:
- Do not use markdown, backticks or code fences. Output only strict JSON.
- Escape newlines inside string values as \n. No raw line breaks inside strings.
- One direction per signal. Never mention both LONG and SHORT as the recommendation.
- Use realistic price levels taken from the market data you received. No placeholder values.
- SL must be below entry for LONG, above entry for SHORT; TP must be above entry for LONG, below entry for SHORT.
- RR = (TP-Entry)/(Entry-SL) for LONG, (Entry-TP)/(SL-Entry) for SHORT.
- Confidence is an integer between 0 and 100, never a percentage, and must honestly reflect the quality of the setup.
- Thoughts must be a detailed, structured analysis of the market conditions, not just a summary.
- Multi-timeframe reasoning is required.
- If no valid setup exists, fill all prices with 0, set confidence to 0 and explain why in "thoughts". Direction must still be "LONG" or "SHORT" (the more probable one, never "NONE").
"#;

const AGENT_PRICE_RULES: &str = r#"- ENTRY must exactly equal the provided current_price value.
- Place SL and TP on recent swing highs/lows or clearly identified support/resistance in the provided data.
- If placement is ambiguous, fall back to 1x ATR (last 14 candles) away from ENTRY.
- Reference the exact candles or structure used for SL and TP in "thoughts".
- If SL or TP cannot be justified from the data, confidence must be 0.
"#;

fn lens(kind: AgentKind, symbol: &str) -> String {
    match kind {
        AgentKind::Trend => format!(
            r#"You are the Trend Agent. Analyze the following multi-timeframe market data for {symbol} and generate a trading signal focused on overall trend, structure, and momentum. Use only the data provided.

Inputs: multi-timeframe candles (OHLCV) with RSI, MACD and OBV.

- In "thoughts", reference specific candles, price levels or patterns behind your trend assessment (e.g. "Candle 7 on 1h prints a higher high").
- If timeframes disagree, favour the direction supported by the majority and explain the conflict.
- If there is no clear trend, set confidence to 0 and explain why.

Look for: higher highs/lows, breakdowns, trend confirmation, moving-average crossovers.
"#
        ),
        AgentKind::Reversal => format!(
            r#"You are the Reversal Agent. Analyze the following multi-timeframe market data for {symbol} and generate a trading signal focused on reversals, divergences, and exhaustion. Use only the data provided.

Inputs: multi-timeframe candles (OHLCV) with RSI, MACD and OBV.

- In "thoughts", cite the specific reversal signals (e.g. bullish RSI divergence on 1h, pin bar on 15m) and the candles or indicator values behind them.
- If an indicator value is missing (NaN), say so and do not speculate about it.
- If timeframes suggest opposite reversals, choose the one with the clearest multi-timeframe support and explain the choice.
- Prefer well-supported reversal signals over weak or ambiguous ones.

Look for: bullish/bearish RSI divergence, oversold/overbought, pin bars, fakeouts.
"#
        ),
        AgentKind::Volume => format!(
            r#"You are the Volume/Orderflow Agent. Analyze the following multi-timeframe market data for {symbol} and generate a trading signal focused on volume, breakouts, and fakeouts. Use only the data provided.

Inputs: multi-timeframe candles with volume, trade count and OBV.

Look for: volume spikes, volume at support/resistance, false breakouts, absorption, exhaustion.

- In "thoughts", explain which volume patterns drove the decision, referencing specific candles.
- Prioritise setups where significant volume lines up with major support or resistance.
- If a timeframe is missing, analyze the ones available and note the gap.
- Do not assume anything beyond the data. Do not invent prices.
"#
        ),
    }
}

/// Lens instructions, the shared market-data block and the output contract.
pub fn build_agent_prompt(kind: AgentKind, snapshot: &MarketSnapshot) -> String {
    let mut prompt = lens(kind, &snapshot.symbol);
    prompt.push('\n');
    prompt.push_str(&snapshot.render_market_data(6, true));
    prompt.push('\n');
    prompt.push_str(&OUTPUT_CONTRACT.replace("<symbol>", &snapshot.symbol));
    prompt.push('\n');
    prompt.push_str(OUTPUT_RULES);
    prompt.push_str(AGENT_PRICE_RULES);
    prompt
}
