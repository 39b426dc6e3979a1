//! Deterministic in-memory "paper" broker adapter implementing
//! `vgx_execution::BrokerAdapter`.
//!
//! Design decisions (kept intentionally simple/deterministic):
//! - `broker_order_id` is exactly the internal `order_id`.
//! - `broker_message_id` is a stable string derived from request inputs, for
//!   inbox de-dupe — never wall-clock or rng derived.
//! - No randomness, no timestamps (acknowledgment timestamps are always 0;
//!   callers that need wall-clock stamp them at the boundary).
//! - Submits are accepted immediately (no rejects, no partial fills on
//!   submit). Fills are never auto-generated — call `apply_fill` explicitly,
//!   so a backtest matching simulator or test scenario controls exactly
//!   when and at what price a leg fills.

use std::cell::RefCell;
use std::collections::BTreeMap;

use vgx_execution::{
    price_to_micros, BrokerAdapter, BrokerCancelResponse, BrokerReplaceRequest,
    BrokerReplaceResponse, BrokerSubmitRequest, BrokerSubmitResponse,
};
use vgx_reconcile::{BrokerSnapshot, LocalSnapshot, OrderSnapshot, OrderStatus, Side as ReconcileSide};
use vgx_schemas::Side;

pub mod types;

use types::BrokerMessageId;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn to_reconcile_side(side: Side) -> ReconcileSide {
    match side {
        Side::Buy => ReconcileSide::Buy,
        Side::Sell => ReconcileSide::Sell,
    }
}

/// `RefCell`-backed state so `PaperBroker` can implement `BrokerAdapter`'s
/// `&self` methods (the trait is shared-reference by design — submission
/// must not require exclusive access to the router's broker handle).
#[derive(Debug, Default)]
pub struct PaperBroker {
    orders: RefCell<BTreeMap<String, OrderSnapshot>>,
    positions: RefCell<BTreeMap<String, i64>>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_message_id(order_id: &str) -> BrokerMessageId {
        BrokerMessageId::new(format!("paper:msg:submit:{order_id}"))
    }

    pub fn cancel_message_id(order_id: &str) -> BrokerMessageId {
        BrokerMessageId::new(format!("paper:msg:cancel:{order_id}"))
    }

    pub fn replace_message_id(order_id: &str, new_qty: f64) -> BrokerMessageId {
        BrokerMessageId::new(format!("paper:msg:replace:{order_id}:{new_qty}"))
    }

    /// Apply a fill against an existing order: bumps `filled_qty`/status and
    /// the symbol's signed position. Never called by `submit_order` itself.
    pub fn apply_fill(&self, order_id: &str, fill_qty: f64, side: Side) -> Result<()> {
        let fill_qty_micros = price_to_micros(fill_qty)?;
        let mut orders = self.orders.borrow_mut();
        let ord = orders
            .get_mut(order_id)
            .ok_or_else(|| format!("paper broker: unknown order {order_id}"))?;
        ord.filled_qty += fill_qty_micros;
        ord.status = if ord.filled_qty >= ord.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        let signed = match side {
            Side::Buy => fill_qty_micros,
            Side::Sell => -fill_qty_micros,
        };
        *self.positions.borrow_mut().entry(ord.symbol.clone()).or_insert(0) += signed;
        Ok(())
    }

    /// Deterministic listing: `BTreeMap` iteration order is stable.
    pub fn list_orders(&self) -> Vec<OrderSnapshot> {
        self.orders.borrow().values().cloned().collect()
    }

    pub fn positions(&self) -> BTreeMap<String, i64> {
        self.positions.borrow().clone()
    }

    /// Set a position directly, for test setup / scenario wiring.
    pub fn set_position(&self, symbol: impl Into<String>, qty_signed: i64) {
        self.positions.borrow_mut().insert(symbol.into(), qty_signed);
    }

    /// Produce a broker snapshot compatible with `vgx_reconcile`.
    pub fn snapshot(&self) -> (BrokerMessageId, BrokerSnapshot) {
        let msg = BrokerMessageId::new("paper:msg:snapshot");
        let snap = BrokerSnapshot {
            orders: self.orders.borrow().clone(),
            positions: self.positions.borrow().clone(),
        };
        (msg, snap)
    }

    /// Helper for tests: a local view that matches this broker's snapshot.
    pub fn as_local_snapshot(&self) -> LocalSnapshot {
        LocalSnapshot {
            orders: self.orders.borrow().clone(),
            positions: self.positions.borrow().clone(),
        }
    }
}

impl BrokerAdapter for PaperBroker {
    fn submit_order(&self, req: BrokerSubmitRequest) -> Result<BrokerSubmitResponse> {
        let qty_micros = price_to_micros(req.quantity)?;
        let mut orders = self.orders.borrow_mut();

        // Idempotent: a resubmit of the same order_id returns the existing
        // snapshot's status rather than mutating state.
        if let Some(existing) = orders.get(&req.order_id) {
            return Ok(BrokerSubmitResponse {
                broker_order_id: req.order_id,
                submitted_at: 0,
                status: format!("{:?}", existing.status),
            });
        }

        let snap = OrderSnapshot::new(
            req.order_id.clone(),
            req.symbol,
            to_reconcile_side(req.side),
            qty_micros,
            0,
            OrderStatus::Accepted,
        );
        orders.insert(req.order_id.clone(), snap);

        Ok(BrokerSubmitResponse {
            broker_order_id: req.order_id,
            submitted_at: 0,
            status: "accepted".to_string(),
        })
    }

    fn cancel_order(&self, order_id: &str) -> Result<BrokerCancelResponse> {
        let mut orders = self.orders.borrow_mut();
        if let Some(ord) = orders.get_mut(order_id) {
            ord.status = OrderStatus::Canceled;
        }
        Ok(BrokerCancelResponse {
            broker_order_id: order_id.to_string(),
            cancelled_at: 0,
            status: "cancelled".to_string(),
        })
    }

    fn replace_order(&self, req: BrokerReplaceRequest) -> Result<BrokerReplaceResponse> {
        let qty_micros = price_to_micros(req.quantity)?;
        let mut orders = self.orders.borrow_mut();
        if let Some(ord) = orders.get_mut(&req.broker_order_id) {
            ord.qty = qty_micros;
        }
        Ok(BrokerReplaceResponse {
            broker_order_id: req.broker_order_id,
            replaced_at: 0,
            status: "replaced".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgx_execution::OrderRouter;

    fn submit(order_id: &str, symbol: &str, side: Side, qty: f64) -> BrokerSubmitRequest {
        BrokerSubmitRequest {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity: qty,
            order_type: "Limit".to_string(),
            limit_price: Some(100.0),
            reduce_only: false,
            time_in_force: "GTC".to_string(),
        }
    }

    #[test]
    fn submit_is_idempotent_on_same_order_id() {
        let broker = PaperBroker::new();
        let r1 = broker.submit_order(submit("o1", "BTC-USD", Side::Buy, 1.5)).unwrap();
        let r2 = broker.submit_order(submit("o1", "BTC-USD", Side::Buy, 1.5)).unwrap();
        assert_eq!(r1.broker_order_id, r2.broker_order_id);
        assert_eq!(broker.list_orders().len(), 1);
    }

    #[test]
    fn apply_fill_updates_position_and_status() {
        let broker = PaperBroker::new();
        broker.submit_order(submit("o1", "BTC-USD", Side::Buy, 2.0)).unwrap();
        broker.apply_fill("o1", 2.0, Side::Buy).unwrap();

        let ord = broker.list_orders().into_iter().find(|o| o.order_id == "o1").unwrap();
        assert_eq!(ord.status, OrderStatus::Filled);
        assert_eq!(broker.positions().get("BTC-USD").copied(), Some(2_000_000));
    }

    #[test]
    fn cancel_marks_order_canceled() {
        let broker = PaperBroker::new();
        broker.submit_order(submit("o1", "BTC-USD", Side::Sell, 1.0)).unwrap();
        broker.cancel_order("o1").unwrap();
        let ord = broker.list_orders().into_iter().find(|o| o.order_id == "o1").unwrap();
        assert_eq!(ord.status, OrderStatus::Canceled);
    }

    #[test]
    fn router_route_submit_delegates_to_paper_broker() {
        let broker = PaperBroker::new();
        let router = OrderRouter::new(broker);
        let intent = vgx_execution::ExecutionIntent {
            order_id: "entry-1".to_string(),
            symbol: "ETH-USD".to_string(),
            side: Side::Buy,
            qty: 3.0,
            order_type: "Market".to_string(),
            limit_price: None,
            reduce_only: false,
            time_in_force: "GTC".to_string(),
        };
        let resp = router.route_submit(intent).unwrap();
        assert_eq!(resp.broker_order_id, "entry-1");
    }
}
