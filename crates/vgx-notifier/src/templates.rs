//! Human-readable rendering of stream payloads into notification text.
//! A plain-text, single-line cut of the original template module — that one
//! also handled bilingual formatting, which isn't something this rewrite
//! carries.

use vgx_schemas::{ExecutionReport, Payload, RiskEvent};

pub fn render_event_text(payload: &Payload) -> String {
    match payload {
        Payload::ExecutionReport(r) => render_execution_report(r),
        Payload::RiskEvent(e) => render_risk_event(e),
        other => format!("{other:?}"),
    }
}

fn render_execution_report(r: &ExecutionReport) -> String {
    let fill_price = r
        .avg_fill_price
        .map(|p| format!("{p:.2}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "[execution_report] order={} status={:?} filled_qty={:.6} avg_fill_price={fill_price}",
        r.order_id, r.status, r.filled_qty
    )
}

fn render_risk_event(e: &RiskEvent) -> String {
    let symbol = e.symbol_id.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
    format!("[risk_event] {:?} symbol_id={symbol} detail={}", e.kind, e.detail)
}
