//! Balance extraction from upstream payloads
//!
//! The upstream has reported balances in several shapes over time. Each
//! known shape is one extractor; they are tried in order and the first hit
//! wins.

use serde_json::Value;

pub type BalanceExtractor = fn(&Value) -> Option<f64>;

/// Numbers may arrive as JSON numbers or numeric strings
fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn at(value: &Value, path: &[&str]) -> Option<f64> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(key)?;
    }
    number(Some(cursor))
}

/// Known shapes, most specific first
pub static BALANCE_SHAPES: &[(&str, BalanceExtractor)] = &[
    ("balance", |v| at(v, &["balance"])),
    ("data.balance", |v| at(v, &["data", "balance"])),
    ("balances.USD", |v| at(v, &["balances", "USD"])),
    ("data.balances.USD", |v| at(v, &["data", "balances", "USD"])),
    ("balances.VCU", |v| at(v, &["balances", "VCU"])),
    ("data.balances.VCU", |v| at(v, &["data", "balances", "VCU"])),
    ("credits", |v| at(v, &["credits"])),
    ("data.credits", |v| at(v, &["data", "credits"])),
    ("remaining_credits", |v| at(v, &["remaining_credits"])),
    ("data.remaining", |v| at(v, &["data", "remaining"])),
];

/// First matching shape and its value
pub fn extract_with_shape(payload: &Value) -> Option<(&'static str, f64)> {
    BALANCE_SHAPES
        .iter()
        .find_map(|(name, extract)| extract(payload).map(|v| (*name, v)))
}

/// Balance from a payload, 0.0 when no known shape matches
pub fn extract_balance(payload: &Value) -> f64 {
    extract_with_shape(payload).map(|(_, v)| v).unwrap_or(0.0)
}
