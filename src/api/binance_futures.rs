//! Signed REST client for Binance USDⓈ-M futures trading.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

use super::{AccountInfo, AssetBalance, Brokerage, ExchangePosition, OrderAck, OrderRequest};
use crate::config::BrokerageEndpoint;
use crate::models::Environment;
use crate::{Result, TradeError};

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    environment: Environment,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: i64,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    avg_price: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
}

impl From<RawOrder> for OrderAck {
    fn from(raw: RawOrder) -> Self {
        let num = |v: Option<String>| v.and_then(|s| s.parse().ok()).unwrap_or(0.0);
        OrderAck {
            order_id: raw.order_id,
            symbol: raw.symbol,
            status: raw.status,
            price: num(raw.price),
            avg_price: num(raw.avg_price),
            executed_qty: num(raw.executed_qty),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    #[serde(default)]
    assets: Vec<RawAsset>,
    #[serde(default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAsset {
    asset: String,
    #[serde(default)]
    wallet_balance: String,
    #[serde(default)]
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    #[serde(default)]
    position_side: String,
    #[serde(default)]
    position_amt: String,
    #[serde(default)]
    entry_price: String,
}

impl BinanceFuturesClient {
    pub fn new(endpoint: &BrokerageEndpoint, environment: Environment, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TradeError::Upstream(format!("Failed to build HTTP client: {}", e)))?;

        // Half a key pair cannot sign anything; treat it as none.
        let (api_key, secret_key) = if endpoint.has_credentials() {
            (
                endpoint.api_key.clone().unwrap_or_default(),
                endpoint.secret_key.clone().unwrap_or_default(),
            )
        } else {
            if endpoint.api_key.is_some() || endpoint.secret_key.is_some() {
                tracing::warn!("{} brokerage has only one of API key and secret, ignoring both", environment);
            }
            (String::new(), String::new())
        };

        Ok(Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
            environment,
        })
    }

    /// Sign a query string with HMAC-SHA256.
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| TradeError::Unconfigured(format!("brokerage secret key ({})", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<String> {
        if !self.is_configured() {
            return Err(TradeError::Unconfigured(format!(
                "{} brokerage credentials",
                self.environment
            )));
        }

        params.push(("timestamp", chrono::Utc::now().timestamp_millis().to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(e) => format!("Binance API error {}: {}", e.code, e.msg),
                Err(_) => format!("HTTP {}: {}", status, body),
            };
            return Err(TradeError::Upstream(message));
        }
        Ok(body)
    }
}

fn format_amount(value: f64) -> String {
    format!("{:.6}", value)
}

#[async_trait]
impl Brokerage for BinanceFuturesClient {
    fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    fn environment(&self) -> Environment {
        self.environment
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.signed_request(
            Method::POST,
            "/fapi/v1/leverage",
            vec![("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let body = self
            .signed_request(Method::GET, "/fapi/v2/account", Vec::new())
            .await?;
        let raw: RawAccount = serde_json::from_str(&body)
            .map_err(|e| TradeError::Upstream(format!("failed to parse account info: {}", e)))?;

        let num = |s: &str| s.parse::<f64>().unwrap_or(0.0);
        Ok(AccountInfo {
            balances: raw
                .assets
                .iter()
                .map(|a| AssetBalance {
                    asset: a.asset.clone(),
                    wallet_balance: num(&a.wallet_balance),
                    available_balance: num(&a.available_balance),
                })
                .collect(),
            positions: raw
                .positions
                .iter()
                .map(|p| ExchangePosition {
                    symbol: p.symbol.clone(),
                    position_side: p.position_side.clone(),
                    amount: num(&p.position_amt),
                    entry_price: num(&p.entry_price),
                })
                .collect(),
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", format_amount(order.quantity)),
            ("positionSide", order.position_side.to_string()),
        ];
        if let Some(stop) = order.stop_price {
            params.push(("stopPrice", format_amount(stop)));
        }
        if let Some(tif) = order.time_in_force {
            params.push(("timeInForce", tif.to_string()));
        }
        if let Some(wt) = order.working_type {
            params.push(("workingType", wt.to_string()));
        }
        if order.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        params.push(("newOrderRespType", "RESULT".to_string()));

        let body = self
            .signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;
        let raw: RawOrder = serde_json::from_str(&body)
            .map_err(|e| TradeError::Upstream(format!("failed to parse order response: {}", e)))?;

        tracing::info!(
            symbol = %order.symbol,
            "{} {} {} accepted: order {}",
            order.order_type.as_str(),
            order.side.as_str(),
            format_amount(order.quantity),
            raw.order_id
        );
        Ok(raw.into())
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<OrderAck> {
        let body = self
            .signed_request(
                Method::DELETE,
                "/fapi/v1/order",
                vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
            )
            .await?;
        let raw: RawOrder = serde_json::from_str(&body)
            .map_err(|e| TradeError::Upstream(format!("failed to parse cancel response: {}", e)))?;
        Ok(raw.into())
    }

    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderAck> {
        let body = self
            .signed_request(
                Method::GET,
                "/fapi/v1/order",
                vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
            )
            .await?;
        let raw: RawOrder = serde_json::from_str(&body)
            .map_err(|e| TradeError::Upstream(format!("failed to parse order: {}", e)))?;
        Ok(raw.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::OrderType;
    use crate::models::OrderSide;
    use mockito::Matcher;

    fn endpoint(url: &str, with_keys: bool) -> BrokerageEndpoint {
        BrokerageEndpoint {
            base_url: url.to_string(),
            api_key: with_keys.then(|| "key".to_string()),
            secret_key: with_keys.then(|| "secret".to_string()),
        }
    }

    fn client(url: &str) -> BinanceFuturesClient {
        BinanceFuturesClient::new(&endpoint(url, true), Environment::Testnet, Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_signature_is_hex_hmac() {
        let c = client("http://localhost");
        // Worked example from the Binance API documentation.
        let c = BinanceFuturesClient {
            secret_key: "2b5eb11e18796d12d88f13dc27dbbd02c2cc51ff7059765ed9821957d82bb4d9"
                .to_string(),
            ..c
        };
        let sig = c
            .sign("symbol=BTCUSDT&side=BUY&type=LIMIT&quantity=1&price=9000&timeInForce=GTC&recvWindow=5000&timestamp=1591702613943")
            .unwrap();
        assert_eq!(
            sig,
            "3c661234138461fcc7a7d8746c6558c9842d4e10870d2ecbedf7777cad694af9"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_client_refuses_signed_calls() {
        let c = BinanceFuturesClient::new(
            &endpoint("http://localhost", false),
            Environment::Live,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!c.is_configured());
        let err = c.account_info().await.unwrap_err();
        assert!(matches!(err, TradeError::Unconfigured(_)));
    }

    #[test]
    fn test_half_credentialed_endpoint_is_unconfigured() {
        let half = BrokerageEndpoint {
            base_url: "http://localhost".to_string(),
            api_key: Some("key".to_string()),
            secret_key: None,
        };
        let c = BinanceFuturesClient::new(&half, Environment::Live, Duration::from_secs(1)).unwrap();
        assert!(!c.is_configured());
        assert!(c.api_key.is_empty());
    }

    #[tokio::test]
    async fn test_account_info_parses_balances_and_positions() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/fapi/v2/account")
            .match_header("X-MBX-APIKEY", "key")
            .match_query(Matcher::Regex("timestamp=\\d+&signature=[0-9a-f]{64}".into()))
            .with_status(200)
            .with_body(
                r#"{"assets":[{"asset":"USDT","walletBalance":"10500.0","availableBalance":"10000.0"}],
                    "positions":[{"symbol":"BTCUSDT","positionSide":"BOTH","positionAmt":"-0.500","entryPrice":"100.0"}]}"#,
            )
            .create_async()
            .await;

        let info = client(&server.url()).account_info().await.unwrap();
        assert_eq!(info.available_balance("USDT"), 10_000.0);
        assert_eq!(info.position_size("BTCUSDT"), 0.5);
    }

    #[tokio::test]
    async fn test_place_trigger_order_sends_bracket_params() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "STOP_MARKET".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("stopPrice".into(), "95.000000".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
                Matcher::UrlEncoded("workingType".into(), "MARK_PRICE".into()),
                Matcher::UrlEncoded("positionSide".into(), "BOTH".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"orderId":77,"symbol":"BTCUSDT","status":"NEW","price":"0","avgPrice":"0.00"}"#)
            .create_async()
            .await;

        let order =
            OrderRequest::trigger("BTCUSDT", OrderSide::Sell, OrderType::StopMarket, 400.0, 95.0);
        let ack = client(&server.url()).place_order(&order).await.unwrap();
        assert_eq!(ack.order_id, 77);
        assert_eq!(ack.fill_price(), None);
    }

    #[tokio::test]
    async fn test_rejected_order_surfaces_exchange_message() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
            .create_async()
            .await;

        let order = OrderRequest::market("BTCUSDT", OrderSide::Buy, 1.0);
        let err = client(&server.url()).place_order(&order).await.unwrap_err();
        assert!(err.to_string().contains("Margin is insufficient"));
    }
}
