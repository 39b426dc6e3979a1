//! Private WS event interpretation — pure mapping from a venue push message
//! (`vgx_exchange::PrivateWsEvent`) to the order/fill state the caller
//! should persist. The connection itself, order lookup by exchange id,
//! persistence, and republishing stay in the daemon's execution service;
//! this module only decides what changed.

use vgx_schemas::OrderStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct WsOrderUpdate {
    pub exchange_order_id: String,
    pub exchange_link_id: Option<String>,
    pub status: OrderStatus,
    pub filled_qty: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WsFillUpdate {
    pub exchange_order_id: String,
    pub exchange_fill_id: Option<String>,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub ts_ms: i64,
}

fn parse_f64(v: &serde_json::Value, field: &str) -> Option<f64> {
    v.get(field)?.as_str()?.parse::<f64>().ok()
}

/// Parses one element of the `order` topic's data array.
pub fn parse_order_update(entry: &serde_json::Value) -> Option<WsOrderUpdate> {
    let exchange_order_id = entry.get("orderId")?.as_str()?.to_string();
    let exchange_link_id = entry
        .get("orderLinkId")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let status = match entry.get("orderStatus")?.as_str()? {
        "New" | "Untriggered" => OrderStatus::Open,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "Deactivated" => OrderStatus::Cancelled,
        "Rejected" => OrderStatus::Rejected,
        _ => return None,
    };
    let filled_qty = parse_f64(entry, "cumExecQty").unwrap_or(0.0);
    Some(WsOrderUpdate { exchange_order_id, exchange_link_id, status, filled_qty })
}

/// Parses one element of the `execution` topic's data array into a fill.
/// `Filled` eagerly short-circuits the usual partial-fill accumulation: once
/// this event reports the order fully filled, the caller marks it `Filled`
/// immediately rather than waiting on the separate `order` topic push for
/// the same transition.
pub fn parse_fill_update(entry: &serde_json::Value) -> Option<WsFillUpdate> {
    Some(WsFillUpdate {
        exchange_order_id: entry.get("orderId")?.as_str()?.to_string(),
        exchange_fill_id: entry.get("execId").and_then(|v| v.as_str()).map(str::to_string),
        qty: parse_f64(entry, "execQty")?,
        price: parse_f64(entry, "execPrice")?,
        fee: parse_f64(entry, "execFee").unwrap_or(0.0),
        ts_ms: entry
            .get("execTime")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_new() {
        let v = serde_json::json!({
            "orderId": "ex-1",
            "orderLinkId": "link-1",
            "orderStatus": "New",
            "cumExecQty": "0",
        });
        let u = parse_order_update(&v).unwrap();
        assert_eq!(u.exchange_order_id, "ex-1");
        assert_eq!(u.status, OrderStatus::Open);
        assert_eq!(u.filled_qty, 0.0);
    }

    #[test]
    fn parses_order_filled() {
        let v = serde_json::json!({
            "orderId": "ex-1",
            "orderStatus": "Filled",
            "cumExecQty": "1.5",
        });
        let u = parse_order_update(&v).unwrap();
        assert_eq!(u.status, OrderStatus::Filled);
        assert_eq!(u.filled_qty, 1.5);
    }

    #[test]
    fn unknown_status_is_ignored() {
        let v = serde_json::json!({"orderId": "ex-1", "orderStatus": "Triggered"});
        assert!(parse_order_update(&v).is_none());
    }

    #[test]
    fn parses_fill() {
        let v = serde_json::json!({
            "orderId": "ex-1",
            "execId": "fill-1",
            "execQty": "0.5",
            "execPrice": "50000.0",
            "execFee": "0.01",
            "execTime": "1700000000000",
        });
        let f = parse_fill_update(&v).unwrap();
        assert_eq!(f.exchange_fill_id.as_deref(), Some("fill-1"));
        assert_eq!(f.qty, 0.5);
        assert_eq!(f.ts_ms, 1_700_000_000_000);
    }

    #[test]
    fn missing_required_field_yields_none() {
        let v = serde_json::json!({"orderId": "ex-1", "execQty": "0.5"});
        assert!(parse_fill_update(&v).is_none());
    }
}
