use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a request's cost is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingSource {
    #[default]
    Wallet,
    Subscription,
}

impl BillingSource {
    /// Empty and unknown tags bill the wallet.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "subscription" => Self::Subscription,
            _ => Self::Wallet,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("insufficient quota: {0}")]
    InsufficientQuota(String),
    #[error("billing backend failed: {0}")]
    Backend(String),
}

/// Settlement session owned by the billing layer. The session context only
/// holds a shared handle; pre-consume, settle and refund happen elsewhere.
#[async_trait]
pub trait BillingSettler: Send + Sync + fmt::Debug {
    fn pre_consumed_quota(&self) -> i64;
    fn needs_refund(&self) -> bool;
    async fn settle(&self, actual_quota: i64) -> Result<(), BillingError>;
    async fn refund(&self) -> Result<(), BillingError>;
}

/// Subscription identifiers recorded when [`BillingSource::Subscription`] applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionBilling {
    pub subscription_id: i64,
    /// Pre-consumed on the subscription item (quota units, or 1 for per-call plans).
    pub pre_consumed: i64,
    /// Post-consume delta applied to amount used; may be negative.
    pub post_delta: i64,
    pub plan_id: i64,
    pub plan_title: String,
    pub amount_total: i64,
    pub amount_used_after_pre_consume: i64,
}

impl SubscriptionBilling {
    pub fn remaining(&self) -> i64 {
        self.amount_total - self.amount_used_after_pre_consume
    }
}

/// Pricing facts attached to a request. `other_ratios` holds per-request
/// multipliers such as `seconds` and `size` for generative tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceData {
    pub use_price: bool,
    pub model_ratio: f64,
    pub group_ratio: f64,
    pub other_ratios: BTreeMap<String, f64>,
}

impl Default for PriceData {
    fn default() -> Self {
        Self {
            use_price: false,
            model_ratio: 1.0,
            group_ratio: 1.0,
            other_ratios: BTreeMap::new(),
        }
    }
}

impl PriceData {
    /// Product of all per-request multipliers; 1.0 when none are set.
    pub fn other_ratio_product(&self) -> f64 {
        self.other_ratios.values().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_billing_tags_fall_back_to_wallet() {
        assert_eq!(BillingSource::from_tag(""), BillingSource::Wallet);
        assert_eq!(BillingSource::from_tag("wallet"), BillingSource::Wallet);
        assert_eq!(
            BillingSource::from_tag("subscription"),
            BillingSource::Subscription
        );
    }

    #[test]
    fn remaining_subtracts_used_amount() {
        let sub = SubscriptionBilling {
            amount_total: 100,
            amount_used_after_pre_consume: 30,
            ..SubscriptionBilling::default()
        };
        assert_eq!(sub.remaining(), 70);
    }

    #[test]
    fn other_ratio_product_multiplies_all_ratios() {
        let mut price = PriceData::default();
        assert_eq!(price.other_ratio_product(), 1.0);
        price.other_ratios.insert("seconds".to_string(), 4.0);
        price.other_ratios.insert("size".to_string(), 1.5);
        assert_eq!(price.other_ratio_product(), 6.0);
    }
}
