//! Quote pipeline

use conductor_common::BundleId;
use conductor_entitlement::BundleCatalog;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Round-half-up percentage application, in basis points.
/// `amount` stays in integer cents throughout.
fn bps_of(amount_cents: i64, bps: i64) -> i64 {
    (amount_cents * bps + 5_000) / 10_000
}

/// Pricing configuration: discount rules and promo codes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Discount for annual billing, in basis points
    pub annual_discount_bps: i64,
    /// Volume tiers by seat count, ascending thresholds
    pub volume_tiers: Vec<VolumeTier>,
    /// Redeemable promo codes
    pub promos: HashMap<String, PromoCode>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut promos = HashMap::new();
        promos.insert("LAUNCH20".to_string(), PromoCode::PercentOff { bps: 2_000 });
        promos.insert("WELCOME50".to_string(), PromoCode::FlatOff { cents: 5_000 });

        Self {
            annual_discount_bps: 1_000,
            volume_tiers: vec![
                VolumeTier { min_seats: 25, discount_bps: 500 },
                VolumeTier { min_seats: 100, discount_bps: 1_000 },
                VolumeTier { min_seats: 250, discount_bps: 1_500 },
            ],
            promos,
        }
    }
}

/// Volume discount threshold
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VolumeTier {
    /// Seats required to qualify
    pub min_seats: u32,
    /// Discount in basis points
    pub discount_bps: i64,
}

/// Promo code types. Flat codes subtract cents; percent codes apply
/// multiplicatively. Both apply last in the pipeline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PromoCode {
    /// Fixed amount off
    FlatOff {
        /// Cents subtracted (floored at zero)
        cents: i64,
    },
    /// Percentage off
    PercentOff {
        /// Basis points off
        bps: i64,
    },
}

/// Quote request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuoteRequest {
    /// Seat count
    pub seats: u32,
    /// Annual billing (discounted) instead of monthly
    pub annual: bool,
    /// Selected add-ons
    pub add_ons: Vec<AddOn>,
    /// Promo codes to redeem
    pub discount_codes: Vec<String>,
}

/// Priced add-on
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddOn {
    /// Add-on name
    pub name: String,
    /// Monthly price per unit in cents
    pub monthly_cents: i64,
    /// Units purchased
    pub quantity: u32,
}

/// Pricing calculator. Given identical inputs the quote is identical,
/// including across repeated calls.
pub struct PricingCalculator {
    bundles: Arc<BundleCatalog>,
    config: PricingConfig,
}

impl PricingCalculator {
    /// Calculator over the bundle catalog
    pub fn new(bundles: Arc<BundleCatalog>, config: PricingConfig) -> Self {
        Self { bundles, config }
    }

    /// Compute a monthly price quote.
    ///
    /// Application order is fixed: base price × seats (plus add-ons),
    /// then annual discount, then volume discount, then promo codes.
    pub fn quote(
        &self,
        bundle_id: &BundleId,
        request: &QuoteRequest,
    ) -> Result<PriceBreakdown, QuoteError> {
        let bundle = self
            .bundles
            .get(bundle_id)
            .ok_or_else(|| QuoteError::UnknownBundle(bundle_id.clone()))?;

        if request.seats == 0 || request.seats > bundle.ceilings.max_seats {
            return Err(QuoteError::InvalidSeatCount {
                seats: request.seats,
                max: bundle.ceilings.max_seats,
            });
        }

        // (1) base
        let base_cents = bundle.seat_price_cents * request.seats as i64;
        let add_on_cents: i64 = request
            .add_ons
            .iter()
            .map(|a| a.monthly_cents * a.quantity as i64)
            .sum();
        let subtotal = base_cents + add_on_cents;

        // (2) annual discount, multiplicative
        let annual_discount = if request.annual {
            bps_of(subtotal, self.config.annual_discount_bps)
        } else {
            0
        };
        let after_annual = subtotal - annual_discount;

        // (3) volume discount, multiplicative on the discounted amount
        let volume_bps = self
            .config
            .volume_tiers
            .iter()
            .filter(|t| request.seats >= t.min_seats)
            .map(|t| t.discount_bps)
            .max()
            .unwrap_or(0);
        let volume_discount = bps_of(after_annual, volume_bps);
        let after_volume = after_annual - volume_discount;

        // (4) promo codes, last
        let mut promo_discount = 0i64;
        let mut running = after_volume;
        for code in &request.discount_codes {
            let promo = self
                .config
                .promos
                .get(code)
                .ok_or_else(|| QuoteError::UnknownDiscountCode(code.clone()))?;
            let off = match promo {
                PromoCode::FlatOff { cents } => (*cents).min(running),
                PromoCode::PercentOff { bps } => bps_of(running, *bps),
            };
            promo_discount += off;
            running -= off;
        }

        Ok(PriceBreakdown {
            bundle_id: bundle_id.clone(),
            seats: request.seats,
            base_cents,
            add_on_cents,
            annual_discount_cents: annual_discount,
            volume_discount_cents: volume_discount,
            promo_discount_cents: promo_discount,
            total_cents: running,
            total_display: Decimal::new(running, 2),
        })
    }

    /// Preview the proration of a mid-period plan change: credit for the
    /// unused remainder of the current bundle, charge for the same span
    /// of the new one.
    pub fn proration_preview(
        &self,
        current: &BundleId,
        target: &BundleId,
        seats: u32,
        days_remaining: i64,
        days_total: i64,
    ) -> Result<ProrationPreview, QuoteError> {
        if days_total <= 0 || days_remaining < 0 || days_remaining > days_total {
            return Err(QuoteError::InvalidProrationWindow { days_remaining, days_total });
        }
        let monthly = |id: &BundleId| -> Result<i64, QuoteError> {
            let bundle = self
                .bundles
                .get(id)
                .ok_or_else(|| QuoteError::UnknownBundle(id.clone()))?;
            Ok(bundle.seat_price_cents * seats as i64)
        };

        let prorate = |cents: i64| (cents * days_remaining + days_total / 2) / days_total;
        let credit_cents = prorate(monthly(current)?);
        let charge_cents = prorate(monthly(target)?);

        Ok(ProrationPreview {
            credit_cents,
            charge_cents,
            net_cents: charge_cents - credit_cents,
        })
    }
}

/// Itemized quote, all values in cents
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Quoted bundle
    pub bundle_id: BundleId,
    /// Seats quoted
    pub seats: u32,
    /// Seat price × seats
    pub base_cents: i64,
    /// Add-on subtotal
    pub add_on_cents: i64,
    /// Annual-billing discount
    pub annual_discount_cents: i64,
    /// Volume discount
    pub volume_discount_cents: i64,
    /// Promo code discount
    pub promo_discount_cents: i64,
    /// Final monthly total
    pub total_cents: i64,
    /// Display value, rounded half-up to whole cents upstream
    pub total_display: Decimal,
}

/// Proration preview for a mid-period plan change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationPreview {
    /// Credit for the unused remainder of the current plan
    pub credit_cents: i64,
    /// Charge for the remainder on the new plan
    pub charge_cents: i64,
    /// Net amount due now
    pub net_cents: i64,
}

/// Quote validation errors. Pure validation, nothing to unwind.
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    /// Bundle id absent from the catalog
    #[error("unknown bundle: {0}")]
    UnknownBundle(BundleId),

    /// Zero seats or above the bundle maximum
    #[error("invalid seat count {seats} (max {max})")]
    InvalidSeatCount {
        /// Requested seats
        seats: u32,
        /// Bundle maximum
        max: u32,
    },

    /// Discount code not in the promo table
    #[error("unknown discount code: {0}")]
    UnknownDiscountCode(String),

    /// Nonsensical proration window
    #[error("invalid proration window: {days_remaining}/{days_total}")]
    InvalidProrationWindow {
        /// Days left in the period
        days_remaining: i64,
        /// Days in the period
        days_total: i64,
    },
}

impl conductor_common::ErrorCode for QuoteError {
    fn code(&self) -> &'static str {
        "quote_invalid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calculator() -> PricingCalculator {
        PricingCalculator::new(Arc::new(BundleCatalog::builtin()), PricingConfig::default())
    }

    fn request(seats: u32) -> QuoteRequest {
        QuoteRequest {
            seats,
            annual: false,
            add_ons: vec![],
            discount_codes: vec![],
        }
    }

    #[test]
    fn test_base_quote() {
        let calc = calculator();
        let breakdown = calc
            .quote(&BundleId::from("professional"), &request(10))
            .unwrap();
        assert_eq!(breakdown.base_cents, 99_000);
        assert_eq!(breakdown.total_cents, 99_000);
        assert_eq!(breakdown.total_display, dec!(990.00));
    }

    #[test]
    fn test_discount_order_annual_then_volume_then_promo() {
        let calc = calculator();
        let breakdown = calc
            .quote(
                &BundleId::from("professional"),
                &QuoteRequest {
                    seats: 30,
                    annual: true,
                    add_ons: vec![],
                    discount_codes: vec!["LAUNCH20".into()],
                },
            )
            .unwrap();

        // 30 seats * $99 = $2970.00
        assert_eq!(breakdown.base_cents, 297_000);
        // annual 10% off 297000 = 29700
        assert_eq!(breakdown.annual_discount_cents, 29_700);
        // volume 5% (25+ seats) of 267300 = 13365
        assert_eq!(breakdown.volume_discount_cents, 13_365);
        // promo 20% of 253935 = 50787
        assert_eq!(breakdown.promo_discount_cents, 50_787);
        assert_eq!(breakdown.total_cents, 203_148);
    }

    #[test]
    fn test_add_ons_priced_before_discounts() {
        let calc = calculator();
        let breakdown = calc
            .quote(
                &BundleId::from("starter"),
                &QuoteRequest {
                    seats: 2,
                    annual: true,
                    add_ons: vec![AddOn {
                        name: "extra-storage".into(),
                        monthly_cents: 1_000,
                        quantity: 3,
                    }],
                    discount_codes: vec![],
                },
            )
            .unwrap();
        // (2*2900 + 3*1000) = 8800, annual 10% = 880
        assert_eq!(breakdown.add_on_cents, 3_000);
        assert_eq!(breakdown.annual_discount_cents, 880);
        assert_eq!(breakdown.total_cents, 7_920);
    }

    #[test]
    fn test_flat_promo_floors_at_zero() {
        let mut config = PricingConfig::default();
        config
            .promos
            .insert("BIGOFF".into(), PromoCode::FlatOff { cents: 10_000_000 });
        let calc = PricingCalculator::new(Arc::new(BundleCatalog::builtin()), config);

        let breakdown = calc
            .quote(
                &BundleId::from("starter"),
                &QuoteRequest {
                    seats: 1,
                    annual: false,
                    add_ons: vec![],
                    discount_codes: vec!["BIGOFF".into()],
                },
            )
            .unwrap();
        assert_eq!(breakdown.total_cents, 0);
    }

    #[test]
    fn test_invalid_inputs() {
        let calc = calculator();

        assert!(matches!(
            calc.quote(&BundleId::from("starter"), &request(0)),
            Err(QuoteError::InvalidSeatCount { .. })
        ));
        assert!(matches!(
            calc.quote(&BundleId::from("starter"), &request(6)),
            Err(QuoteError::InvalidSeatCount { .. })
        ));

        let mut req = request(2);
        req.discount_codes.push("NOPE".into());
        assert!(matches!(
            calc.quote(&BundleId::from("starter"), &req),
            Err(QuoteError::UnknownDiscountCode(_))
        ));
    }

    #[test]
    fn test_proration_preview() {
        let calc = calculator();
        let preview = calc
            .proration_preview(
                &BundleId::from("professional"),
                &BundleId::from("enterprise"),
                10,
                15,
                30,
            )
            .unwrap();
        // half the period left: credit half of 99000, charge half of 499000
        assert_eq!(preview.credit_cents, 49_500);
        assert_eq!(preview.charge_cents, 249_500);
        assert_eq!(preview.net_cents, 200_000);
    }

    proptest::proptest! {
        /// Identical inputs always produce identical breakdowns, and the
        /// total never exceeds the undiscounted subtotal.
        #[test]
        fn prop_quote_deterministic(
            seats in 1u32..=500,
            annual in proptest::bool::ANY,
            code_idx in 0usize..3,
        ) {
            let calc = calculator();
            let codes = [vec![], vec!["LAUNCH20".to_string()], vec!["WELCOME50".to_string()]];
            let request = QuoteRequest {
                seats,
                annual,
                add_ons: vec![],
                discount_codes: codes[code_idx].clone(),
            };
            let bundle = BundleId::from("enterprise");

            let first = calc.quote(&bundle, &request).unwrap();
            let second = calc.quote(&bundle, &request).unwrap();
            proptest::prop_assert_eq!(&first, &second);
            proptest::prop_assert!(first.total_cents <= first.base_cents + first.add_on_cents);
            proptest::prop_assert!(first.total_cents >= 0);
        }
    }
}
