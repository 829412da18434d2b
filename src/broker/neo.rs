//! Neo trading API integration.
//!
//! REST client for the vendor's retail trading gateway: two-step TOTP +
//! MPIN login, bulk quotes, order placement/cancellation, and order
//! history. Response shapes vary across gateway versions, so the structs
//! below deserialize tolerantly (`#[serde(default)]` + field aliases,
//! mirroring the fallbacks the vendor SDK applies).
//!
//! Every request carries a bounded timeout and a correlation id; idempotent
//! reads (quotes, order history) are retried once on transport failure.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use super::{
    Broker, BrokerSession, Credentials, OrderAck, OrderRequest, OrderUpdate, QuoteRequest,
    QuoteTick,
};
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::types::{OrderStatus, Side};

/// Pause before the single retry of an idempotent read.
const RETRY_DELAY: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Wire types (vendor JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TotpLoginBody<'a> {
    #[serde(rename = "mobileNumber")]
    mobile_number: &'a str,
    ucc: &'a str,
    totp: &'a str,
}

#[derive(Debug, Serialize)]
struct MpinValidateBody<'a> {
    mpin: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    data: SessionData,
}

#[derive(Debug, Default, Deserialize)]
struct SessionData {
    #[serde(default)]
    token: String,
    #[serde(default)]
    sid: String,
}

#[derive(Debug, Serialize)]
struct QuoteBody<'a> {
    instrument_tokens: Vec<QuoteInstrument<'a>>,
    quote_type: &'a str,
}

#[derive(Debug, Serialize)]
struct QuoteInstrument<'a> {
    instrument_token: &'a str,
    exchange_segment: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct QuotesEnvelope {
    #[serde(default)]
    data: Vec<QuoteRow>,
}

/// One instrument's quote. Older gateways report `tk`/`lastPrice`/`oi`,
/// newer ones `exchange_token`/`ltp`/`open_int`.
#[derive(Debug, Default, Deserialize)]
struct QuoteRow {
    #[serde(default, alias = "tk")]
    exchange_token: String,
    #[serde(default, alias = "lastPrice")]
    ltp: f64,
    #[serde(default, alias = "openInterest", alias = "oi")]
    open_int: i64,
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    exchange_segment: &'a str,
    product: &'a str,
    price: String,
    order_type: &'a str,
    quantity: String,
    validity: &'a str,
    trading_symbol: &'a str,
    transaction_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger_price: Option<String>,
    amo: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct PlaceOrderResponse {
    #[serde(default, rename = "nOrdNo")]
    order_id: String,
    #[serde(default, alias = "errMsg", alias = "emsg")]
    error_message: String,
}

#[derive(Debug, Serialize)]
struct OrderIdBody<'a> {
    order_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryEnvelope {
    #[serde(default)]
    data: Vec<HistoryRow>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryRow {
    #[serde(default, alias = "ordSt")]
    status: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST client for the Neo trading gateway.
pub struct NeoClient {
    http: Client,
    base_url: String,
}

impl NeoClient {
    pub fn new(cfg: &BrokerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .user_agent("PREMIA/0.1.0 (options-engine)")
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a JSON body with session auth and a fresh correlation id.
    async fn post_authed<B: Serialize>(
        &self,
        session: &BrokerSession,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&session.auth_token)
            .header("sid", &session.session_id)
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(body)
            .send()
            .await?;
        Self::check(resp).await
    }

    /// Map non-2xx responses into transport errors carrying the body.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("broker API error {status}: {body}")));
        }
        Ok(resp)
    }

    async fn quotes_once(
        &self,
        session: &BrokerSession,
        instruments: &[QuoteRequest],
    ) -> Result<Vec<QuoteTick>> {
        let body = QuoteBody {
            instrument_tokens: instruments
                .iter()
                .map(|i| QuoteInstrument {
                    instrument_token: &i.token,
                    exchange_segment: &i.exchange,
                })
                .collect(),
            quote_type: "all",
        };

        let envelope: QuotesEnvelope = self
            .post_authed(session, "/quotes/v1/quotes", &body)
            .await?
            .json()
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|row| QuoteTick {
                token: row.exchange_token,
                ltp: row.ltp,
                oi: row.open_int,
            })
            .collect())
    }

    async fn order_history_once(
        &self,
        session: &BrokerSession,
        order_id: &str,
    ) -> Result<Vec<OrderUpdate>> {
        let envelope: HistoryEnvelope = self
            .post_authed(session, "/orders/v1/history", &OrderIdBody { order_id })
            .await?
            .json()
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|row| OrderUpdate {
                status: OrderStatus::parse(&row.status),
            })
            .collect())
    }
}

#[async_trait]
impl Broker for NeoClient {
    async fn login(&self, credentials: &Credentials, totp: &str) -> Result<BrokerSession> {
        // Step 1: TOTP challenge against the consumer key.
        let resp = self
            .http
            .post(self.url("/login/v2/totp/login"))
            .header("consumer-key", credentials.consumer_key.expose_secret())
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(&TotpLoginBody {
                mobile_number: &credentials.mobile,
                ucc: &credentials.ucc,
                totp,
            })
            .send()
            .await?;
        let challenge: SessionEnvelope = Self::check(resp).await?.json().await?;

        if challenge.data.token.is_empty() {
            return Err(Error::Configuration(
                "login rejected: TOTP challenge returned no token".to_string(),
            ));
        }

        // Step 2: MPIN validation upgrades the challenge to a trade session.
        let resp = self
            .http
            .post(self.url("/login/v2/totp/validate"))
            .bearer_auth(&challenge.data.token)
            .header("sid", &challenge.data.sid)
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(&MpinValidateBody {
                mpin: credentials.mpin.expose_secret(),
            })
            .send()
            .await?;
        let validated: SessionEnvelope = Self::check(resp).await?.json().await?;

        if validated.data.token.is_empty() {
            return Err(Error::Configuration(
                "login rejected: MPIN validation failed".to_string(),
            ));
        }

        debug!(ucc = %credentials.ucc, "Broker session established");

        Ok(BrokerSession {
            auth_token: validated.data.token,
            session_id: validated.data.sid,
        })
    }

    async fn quotes(
        &self,
        session: &BrokerSession,
        instruments: &[QuoteRequest],
    ) -> Result<Vec<QuoteTick>> {
        match self.quotes_once(session, instruments).await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Quote call failed, retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                self.quotes_once(session, instruments).await
            }
            other => other,
        }
    }

    async fn place_order(
        &self,
        session: &BrokerSession,
        order: &OrderRequest,
    ) -> Result<OrderAck> {
        let body = PlaceOrderBody {
            exchange_segment: &order.exchange,
            product: &order.product,
            price: format!("{}", order.price),
            order_type: order.order_type.wire_code(),
            quantity: order.qty.to_string(),
            validity: &order.validity,
            trading_symbol: &order.trading_symbol,
            transaction_type: match order.side {
                Side::Buy => "B",
                Side::Sell => "S",
            },
            trigger_price: order.trigger_price.map(|p| format!("{p}")),
            amo: "NO",
        };

        let ack: PlaceOrderResponse = self
            .post_authed(session, "/orders/v1/order", &body)
            .await?
            .json()
            .await?;

        if ack.order_id.is_empty() {
            return Err(Error::Transport(format!(
                "order not accepted: {}",
                if ack.error_message.is_empty() {
                    "no order id in response"
                } else {
                    &ack.error_message
                }
            )));
        }

        debug!(
            order_id = %ack.order_id,
            symbol = %order.trading_symbol,
            side = %order.side,
            qty = order.qty,
            "Order placed"
        );

        Ok(OrderAck {
            order_id: ack.order_id,
        })
    }

    async fn cancel_order(&self, session: &BrokerSession, order_id: &str) -> Result<()> {
        self.post_authed(session, "/orders/v1/cancel", &OrderIdBody { order_id })
            .await?;
        debug!(order_id, "Order cancelled");
        Ok(())
    }

    async fn order_history(
        &self,
        session: &BrokerSession,
        order_id: &str,
    ) -> Result<Vec<OrderUpdate>> {
        match self.order_history_once(session, order_id).await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, order_id, "Order history failed, retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                self.order_history_once(session, order_id).await
            }
            other => other,
        }
    }
}
