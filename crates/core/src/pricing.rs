use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Allowed markup range in percent. The AI recommendation is always clamped into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupBounds {
    pub min_percent: Decimal,
    pub max_percent: Decimal,
}

impl MarkupBounds {
    /// An inverted pair is reordered rather than rejected.
    pub fn new(min_percent: Decimal, max_percent: Decimal) -> Self {
        if min_percent <= max_percent {
            Self { min_percent, max_percent }
        } else {
            Self { min_percent: max_percent, max_percent: min_percent }
        }
    }

    pub fn clamp(&self, percent: Decimal) -> Decimal {
        percent.max(self.min_percent).min(self.max_percent)
    }

    /// Clamps a raw model-produced percentage. Non-finite input falls back to the floor.
    pub fn clamp_recommendation(&self, percent: f64) -> Decimal {
        match Decimal::from_f64(percent) {
            Some(value) if percent.is_finite() => self.clamp(value),
            _ => self.min_percent,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteBreakdown {
    pub supplier_price: Decimal,
    pub markup_percent: Decimal,
    pub markup_amount: Decimal,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Two decimal places, half away from zero, always carrying scale 2 (`1458.00`).
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Deterministic quote arithmetic. `markup_percent` must already be clamped.
pub fn compute_quote(
    supplier_price: Decimal,
    markup_percent: Decimal,
    tax_rate: Decimal,
) -> QuoteBreakdown {
    let supplier_price = round_money(supplier_price);
    let markup_amount = round_money(supplier_price * markup_percent / Decimal::ONE_HUNDRED);
    let subtotal = supplier_price + markup_amount;
    let tax_amount = round_money(subtotal * tax_rate);
    let total = subtotal + tax_amount;

    QuoteBreakdown {
        supplier_price,
        markup_percent,
        markup_amount,
        subtotal,
        tax_rate,
        tax_amount,
        total,
    }
}
