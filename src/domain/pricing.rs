//! Delivery cost calculation.
//!
//! Rates are in taka. Arithmetic stays in `Decimal` so fractional weights are
//! carried through exactly; rounding happens only in [`display_amount`].

use rust_decimal::Decimal;
use thiserror::Error;

use super::entities::ParcelKind;

pub type Cost = Decimal;

const DOCUMENT_SAME_ZONE: i64 = 60;
const DOCUMENT_CROSS_ZONE: i64 = 80;
const PARCEL_SAME_ZONE: i64 = 110;
const PARCEL_CROSS_ZONE: i64 = 150;
const INCLUDED_WEIGHT_KG: i64 = 3;
const PER_EXTRA_KG: i64 = 40;
const CROSS_ZONE_SURCHARGE: i64 = 40;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("weight is required for non-document parcels")]
    MissingWeight,
    #[error("weight must be positive, got {0}")]
    NonPositiveWeight(Decimal),
}

/// Which rate rule produced a quote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PricingTier {
    Document,
    /// Non-document up to and including the included weight.
    Standard,
    /// Non-document above the included weight.
    Overweight,
}

/// Itemised cost shown on the review step.
#[derive(Clone, Debug, PartialEq)]
pub struct Quote {
    pub kind: ParcelKind,
    pub weight: Option<Decimal>,
    pub same_zone: bool,
    pub tier: PricingTier,
    pub base: Cost,
    pub extra_weight_charge: Cost,
    pub surcharge: Cost,
    pub total: Cost,
}

/// Compute the delivery cost for a parcel.
///
/// `weight` is ignored for documents. For non-documents it must be present and
/// positive; a weight of exactly 3 kg stays in the standard tier.
pub fn compute_cost(
    kind: ParcelKind,
    weight: Option<Decimal>,
    same_zone: bool,
) -> Result<Cost, PricingError> {
    quote(kind, weight, same_zone).map(|quote| quote.total)
}

pub fn quote(
    kind: ParcelKind,
    weight: Option<Decimal>,
    same_zone: bool,
) -> Result<Quote, PricingError> {
    if kind == ParcelKind::Document {
        let base = Decimal::from(if same_zone {
            DOCUMENT_SAME_ZONE
        } else {
            DOCUMENT_CROSS_ZONE
        });
        return Ok(Quote {
            kind,
            weight,
            same_zone,
            tier: PricingTier::Document,
            base,
            extra_weight_charge: Decimal::ZERO,
            surcharge: Decimal::ZERO,
            total: base,
        });
    }

    let weight = weight.ok_or(PricingError::MissingWeight)?;
    if weight <= Decimal::ZERO {
        return Err(PricingError::NonPositiveWeight(weight));
    }

    let base = Decimal::from(if same_zone {
        PARCEL_SAME_ZONE
    } else {
        PARCEL_CROSS_ZONE
    });
    let included = Decimal::from(INCLUDED_WEIGHT_KG);

    if weight <= included {
        return Ok(Quote {
            kind,
            weight: Some(weight),
            same_zone,
            tier: PricingTier::Standard,
            base,
            extra_weight_charge: Decimal::ZERO,
            surcharge: Decimal::ZERO,
            total: base,
        });
    }

    let extra_weight_charge = (weight - included) * Decimal::from(PER_EXTRA_KG);
    let surcharge = if same_zone {
        Decimal::ZERO
    } else {
        Decimal::from(CROSS_ZONE_SURCHARGE)
    };

    Ok(Quote {
        kind,
        weight: Some(weight),
        same_zone,
        tier: PricingTier::Overweight,
        base,
        extra_weight_charge,
        surcharge,
        total: base + extra_weight_charge + surcharge,
    })
}

/// Same-zone pricing applies when pickup and drop-off share a district.
pub fn same_zone(origin_district: &str, destination_district: &str) -> bool {
    let origin = origin_district.trim();
    !origin.is_empty() && origin.eq_ignore_ascii_case(destination_district.trim())
}

/// Format an amount for display: two decimal places at most, trailing zeros trimmed.
pub fn display_amount(amount: Cost) -> String {
    format!("৳{}", amount.round_dp(2).normalize())
}
