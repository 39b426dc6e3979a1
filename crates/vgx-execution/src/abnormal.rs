//! Entry-order timeout/reprice/fallback-market handling — pure decision
//! logic over resting entry orders. LIVE + limit-entry mode only; a market
//! entry order never sits long enough to time out.
//!
//! IO (DB reads, the periodic tick, cancel/resubmit calls through
//! `BrokerGateway`) lives in the daemon's execution service; this module
//! only decides what to do with one order given its age.

use vgx_schemas::{Order, OrderPurpose, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbnormalAction {
    /// Still within the timeout window.
    None,
    /// Timed out with no (or partial) fill: cancel and resubmit as a fresh
    /// limit order at the current market price.
    CancelAndReprice,
    /// Already reprised `max_reprice_attempts` times and timed out again:
    /// cancel and resubmit at market to guarantee entry.
    FallbackMarket,
}

/// Evaluates one order against the timeout window. `reprice_attempts` is
/// tracked by the caller (no counter column on `Order`), since it resets to
/// zero only when a *new* `order_id` is minted for the reprised leg.
pub fn evaluate_entry_timeout(
    order: &Order,
    now_ms: i64,
    timeout_ms: i64,
    reprice_attempts: u32,
    max_reprice_attempts: u32,
) -> AbnormalAction {
    if order.purpose != OrderPurpose::Entry {
        return AbnormalAction::None;
    }
    if !matches!(
        order.status,
        OrderStatus::Submitted | OrderStatus::Open | OrderStatus::PartiallyFilled
    ) {
        return AbnormalAction::None;
    }
    if now_ms - order.updated_at_ms < timeout_ms {
        return AbnormalAction::None;
    }
    if reprice_attempts >= max_reprice_attempts {
        AbnormalAction::FallbackMarket
    } else {
        AbnormalAction::CancelAndReprice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use vgx_schemas::Side;

    fn order(status: OrderStatus, updated_at_ms: i64) -> Order {
        Order {
            order_id: Uuid::nil(),
            plan_id: None,
            symbol_id: 1,
            purpose: OrderPurpose::Entry,
            side: Side::Buy,
            qty: 1.0,
            limit_price: Some(100.0),
            client_order_id: "c1".to_string(),
            exchange_order_id: None,
            exchange_link_id: None,
            status,
            filled_qty: 0.0,
            created_at_ms: 0,
            updated_at_ms,
        }
    }

    #[test]
    fn fresh_order_is_left_alone() {
        let o = order(OrderStatus::Submitted, 1_000);
        assert_eq!(evaluate_entry_timeout(&o, 1_500, 5_000, 0, 2), AbnormalAction::None);
    }

    #[test]
    fn stale_order_is_reprised_before_max_attempts() {
        let o = order(OrderStatus::Open, 1_000);
        assert_eq!(
            evaluate_entry_timeout(&o, 10_000, 5_000, 0, 2),
            AbnormalAction::CancelAndReprice
        );
    }

    #[test]
    fn stale_order_falls_back_to_market_after_max_attempts() {
        let o = order(OrderStatus::PartiallyFilled, 1_000);
        assert_eq!(
            evaluate_entry_timeout(&o, 10_000, 5_000, 2, 2),
            AbnormalAction::FallbackMarket
        );
    }

    #[test]
    fn non_entry_orders_are_never_touched() {
        let mut o = order(OrderStatus::Open, 0);
        o.purpose = OrderPurpose::Tp1;
        assert_eq!(evaluate_entry_timeout(&o, 100_000, 5_000, 0, 2), AbnormalAction::None);
    }

    #[test]
    fn terminal_orders_are_never_touched() {
        let o = order(OrderStatus::Filled, 0);
        assert_eq!(evaluate_entry_timeout(&o, 100_000, 5_000, 0, 2), AbnormalAction::None);
    }
}
