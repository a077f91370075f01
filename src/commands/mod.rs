//! Command layer: a closed set of trading operations issued through the
//! session's `call` contract.
//!
//! Each variant maps to one exchange method with validated parameters.
//! The session layer neither knows nor cares which operation a call
//! belongs to; everything here is an ordinary correlated request.

use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::session::transport::Connector;
use crate::session::types::book_channel;
use crate::session::Session;

/// Order direction, selecting `private/buy` or `private/sell`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order kind. Limit orders carry a price and are placed post-only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
}

/// One trading operation with already-validated parameters
#[derive(Debug, Clone)]
pub enum Command {
    PlaceOrder {
        instrument: String,
        amount: f64,
        side: OrderSide,
        kind: OrderKind,
        label: Option<String>,
    },
    ModifyOrder {
        order_id: String,
        amount: f64,
        price: f64,
    },
    CancelOrder {
        order_id: String,
    },
    Positions {
        currency: String,
    },
    OrderBook {
        instrument: String,
        depth: u32,
    },
    Instrument {
        instrument: String,
    },
    /// Subscribe to `book.<instrument>.<interval>`; updates arrive on
    /// the session's event stream, not as the dispatch result
    StreamBook {
        instrument: String,
        interval: String,
    },
}

impl Command {
    /// Exchange method this command maps to
    pub fn method(&self) -> &'static str {
        match self {
            Command::PlaceOrder {
                side: OrderSide::Buy,
                ..
            } => "private/buy",
            Command::PlaceOrder {
                side: OrderSide::Sell,
                ..
            } => "private/sell",
            Command::ModifyOrder { .. } => "private/edit",
            Command::CancelOrder { .. } => "private/cancel",
            Command::Positions { .. } => "private/get_positions",
            Command::OrderBook { .. } => "public/get_order_book",
            Command::Instrument { .. } => "public/get_instrument",
            Command::StreamBook { .. } => "public/subscribe",
        }
    }

    /// Request params for this command
    pub fn params(&self) -> Value {
        match self {
            Command::PlaceOrder {
                instrument,
                amount,
                kind,
                label,
                ..
            } => {
                let mut params = json!({
                    "instrument_name": instrument,
                    "amount": amount,
                    "type": match kind {
                        OrderKind::Market => "market",
                        OrderKind::Limit { .. } => "limit",
                    },
                    "label": label.clone().unwrap_or_else(default_label),
                });
                if let OrderKind::Limit { price } = kind {
                    params["price"] = json!(price);
                    params["post_only"] = json!(true);
                }
                params
            }
            Command::ModifyOrder {
                order_id,
                amount,
                price,
            } => json!({
                "order_id": order_id,
                "amount": amount,
                "price": price,
            }),
            Command::CancelOrder { order_id } => json!({ "order_id": order_id }),
            Command::Positions { currency } => json!({ "currency": currency }),
            Command::OrderBook { instrument, depth } => json!({
                "instrument_name": instrument,
                "depth": depth,
            }),
            Command::Instrument { instrument } => json!({ "instrument_name": instrument }),
            Command::StreamBook {
                instrument,
                interval,
            } => json!({ "channels": [book_channel(instrument, interval)] }),
        }
    }
}

/// Execute one command through the session.
///
/// Order placement first fetches the instrument's contract size and
/// rejects amounts that are not a whole multiple of it, so the exchange
/// never sees an order we already know is invalid.
pub async fn dispatch<C: Connector>(session: &Session<C>, command: Command) -> Result<Value> {
    if let Command::PlaceOrder {
        instrument, amount, ..
    } = &command
    {
        let contract_size = fetch_contract_size(session, instrument).await?;
        validate_amount(*amount, contract_size)?;
    }

    let method = command.method();
    info!(method, "dispatching command");
    let result = session.call(method, command.params()).await?;
    Ok(result)
}

/// Look up an instrument's contract size via `public/get_instrument`
async fn fetch_contract_size<C: Connector>(
    session: &Session<C>,
    instrument: &str,
) -> Result<f64> {
    let result = session
        .call(
            "public/get_instrument",
            json!({ "instrument_name": instrument }),
        )
        .await?;
    result
        .get("contract_size")
        .and_then(Value::as_f64)
        .ok_or_else(|| AppError::InvalidOrder(format!("Invalid instrument: {}", instrument)))
}

/// Reject amounts that are not whole multiples of the contract size
fn validate_amount(amount: f64, contract_size: f64) -> Result<()> {
    if contract_size <= 0.0 {
        return Err(AppError::InvalidOrder(format!(
            "Invalid contract size: {}",
            contract_size
        )));
    }
    let lots = amount / contract_size;
    if amount <= 0.0 || (lots - lots.round()).abs() > 1e-9 {
        return Err(AppError::InvalidOrder(format!(
            "Amount {} is not a positive multiple of contract size {}",
            amount, contract_size
        )));
    }
    Ok(())
}

fn default_label() -> String {
    format!("order-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_order_side_selects_method() {
        let buy = Command::PlaceOrder {
            instrument: "ETH-PERPETUAL".into(),
            amount: 10.0,
            side: OrderSide::Buy,
            kind: OrderKind::Market,
            label: None,
        };
        let sell = Command::PlaceOrder {
            instrument: "ETH-PERPETUAL".into(),
            amount: 10.0,
            side: OrderSide::Sell,
            kind: OrderKind::Market,
            label: None,
        };
        assert_eq!(buy.method(), "private/buy");
        assert_eq!(sell.method(), "private/sell");
    }

    #[test]
    fn limit_order_params_carry_price_and_post_only() {
        let cmd = Command::PlaceOrder {
            instrument: "ETH-PERPETUAL".into(),
            amount: 10.0,
            side: OrderSide::Buy,
            kind: OrderKind::Limit { price: 1999.5 },
            label: Some("test-label".into()),
        };
        let params = cmd.params();
        assert_eq!(params["type"], "limit");
        assert_eq!(params["price"], 1999.5);
        assert_eq!(params["post_only"], true);
        assert_eq!(params["label"], "test-label");
    }

    #[test]
    fn market_order_params_have_no_price() {
        let cmd = Command::PlaceOrder {
            instrument: "BTC-PERPETUAL".into(),
            amount: 20.0,
            side: OrderSide::Sell,
            kind: OrderKind::Market,
            label: None,
        };
        let params = cmd.params();
        assert_eq!(params["type"], "market");
        assert!(params.get("price").is_none());
        assert!(params.get("post_only").is_none());
        // Generated label is non-empty
        assert!(!params["label"].as_str().unwrap().is_empty());
    }

    #[test]
    fn stream_book_builds_channel_name() {
        let cmd = Command::StreamBook {
            instrument: "ETH-PERPETUAL".into(),
            interval: "100ms".into(),
        };
        assert_eq!(cmd.method(), "public/subscribe");
        assert_eq!(cmd.params()["channels"][0], "book.ETH-PERPETUAL.100ms");
    }

    #[test]
    fn amount_must_be_positive_multiple_of_contract_size() {
        assert!(validate_amount(10.0, 1.0).is_ok());
        assert!(validate_amount(0.3, 0.1).is_ok());
        assert!(validate_amount(10.5, 1.0).is_err());
        assert!(validate_amount(0.0, 1.0).is_err());
        assert!(validate_amount(-5.0, 1.0).is_err());
        assert!(validate_amount(5.0, 0.0).is_err());
    }

    #[test]
    fn order_book_and_positions_params() {
        let book = Command::OrderBook {
            instrument: "BTC-PERPETUAL".into(),
            depth: 5,
        };
        assert_eq!(book.method(), "public/get_order_book");
        assert_eq!(book.params()["depth"], 5);

        let positions = Command::Positions {
            currency: "ETH".into(),
        };
        assert_eq!(positions.method(), "private/get_positions");
        assert_eq!(positions.params()["currency"], "ETH");
    }
}
