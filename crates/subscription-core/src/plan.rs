//! Plan Tiers
//!
//! The closed set of subscription levels and the catalog tying each level to
//! a Stripe price.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubscriptionError};

/// Subscription plan tiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanTier {
    Basic,
    Standard,
    Pro,
}

impl PlanTier {
    pub const ALL: [PlanTier; 3] = [PlanTier::Basic, PlanTier::Standard, PlanTier::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "Basic",
            PlanTier::Standard => "Standard",
            PlanTier::Pro => "Pro",
        }
    }

    /// Parse a plan name. Matching is case-insensitive.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(PlanTier::Basic),
            "standard" => Ok(PlanTier::Standard),
            "pro" => Ok(PlanTier::Pro),
            _ => Err(SubscriptionError::InvalidPlan(s.to_string())),
        }
    }

    /// Wire form used by the profile service, where "" means no plan
    pub fn wire_id(plan: Option<Self>) -> &'static str {
        plan.map_or("", |p| p.as_str())
    }

    /// Inverse of [`PlanTier::wire_id`]
    pub fn from_wire_id(s: &str) -> Result<Option<Self>> {
        if s.is_empty() {
            Ok(None)
        } else {
            Self::parse(s).map(Some)
        }
    }

    /// Default display amount in whole currency units
    pub fn default_amount(&self) -> i64 {
        match self {
            PlanTier::Basic => 1000,
            PlanTier::Standard => 2000,
            PlanTier::Pro => 5000,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pricing information for one tier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanPrice {
    pub tier: PlanTier,
    pub price_id: String,
    pub amount: i64,
}

/// Tier <-> Stripe price mapping, built once from configuration
#[derive(Clone, Debug, Default)]
pub struct PlanCatalog {
    prices: Vec<PlanPrice>,
}

impl PlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a price for a tier. Empty price ids are skipped so an
    /// unconfigured tier simply cannot be purchased.
    pub fn with_price(mut self, tier: PlanTier, price_id: impl Into<String>) -> Self {
        let price_id = price_id.into();
        if price_id.is_empty() {
            return self;
        }
        self.prices.retain(|p| p.tier != tier);
        self.prices.push(PlanPrice {
            tier,
            price_id,
            amount: tier.default_amount(),
        });
        self
    }

    pub fn price_for(&self, tier: PlanTier) -> Option<&PlanPrice> {
        self.prices.iter().find(|p| p.tier == tier)
    }

    pub fn tier_for_price(&self, price_id: &str) -> Option<PlanTier> {
        self.prices
            .iter()
            .find(|p| p.price_id == price_id)
            .map(|p| p.tier)
    }

    /// Amount for a tier, falling back to the tier default
    pub fn amount_for(&self, tier: PlanTier) -> i64 {
        self.price_for(tier).map_or_else(|| tier.default_amount(), |p| p.amount)
    }

    pub fn prices(&self) -> &[PlanPrice] {
        &self.prices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parsing() {
        assert_eq!(PlanTier::parse("basic").unwrap(), PlanTier::Basic);
        assert_eq!(PlanTier::parse("Pro").unwrap(), PlanTier::Pro);
        assert!(PlanTier::parse("Enterprise").is_err());
    }

    #[test]
    fn test_wire_id_round_trip_for_empty_plan() {
        assert_eq!(PlanTier::wire_id(None), "");
        assert_eq!(PlanTier::from_wire_id("").unwrap(), None);
        assert_eq!(PlanTier::from_wire_id("Standard").unwrap(), Some(PlanTier::Standard));
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = PlanCatalog::new()
            .with_price(PlanTier::Basic, "price_basic")
            .with_price(PlanTier::Pro, "price_pro")
            .with_price(PlanTier::Standard, "");

        assert_eq!(catalog.tier_for_price("price_pro"), Some(PlanTier::Pro));
        assert_eq!(catalog.tier_for_price("price_unknown"), None);
        assert!(catalog.price_for(PlanTier::Standard).is_none());
        assert_eq!(catalog.amount_for(PlanTier::Basic), 1000);
    }
}
