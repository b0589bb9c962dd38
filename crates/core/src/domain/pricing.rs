use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// One persisted row describing a provider's pricing plan.
///
/// Records are immutable once inserted: there is no update or delete path,
/// and repeated extraction of the same plan produces additional rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingRecord {
    pub id: i64,
    pub company_name: String,
    pub plan_name: String,
    pub input_token_cost: Option<f64>,
    pub output_token_cost: Option<f64>,
    pub currency: String,
    pub billing_period: String,
    pub features: Vec<String>,
    pub limitations: String,
    pub source_query: String,
    pub created_at: String,
}

/// Pre-insert shape of a pricing record. The identifier and timestamp are
/// assigned by the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPricingRecord {
    pub company_name: String,
    pub plan_name: String,
    pub input_token_cost: Option<f64>,
    pub output_token_cost: Option<f64>,
    pub currency: String,
    pub billing_period: String,
    pub features: Vec<String>,
    pub limitations: String,
    pub source_query: String,
}

impl NewPricingRecord {
    /// A record must name at least the company or the plan.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.company_name.trim().is_empty() && self.plan_name.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "pricing record requires a company name or a plan name".to_string(),
            ));
        }
        Ok(())
    }
}

impl PricingRecord {
    /// Single-line rendering used by the `show data` dump.
    pub fn summary_line(&self) -> String {
        let input = match self.input_token_cost {
            Some(cost) => format!("{cost}"),
            None => "?".to_string(),
        };
        let output = match self.output_token_cost {
            Some(cost) => format!("{cost}"),
            None => "?".to_string(),
        };
        let currency = if self.currency.is_empty() { "?" } else { &self.currency };
        let period = if self.billing_period.is_empty() { "?" } else { &self.billing_period };
        format!(
            "#{} {} / {} — in {input}, out {output} ({currency}, {period}) [{}]",
            self.id, self.company_name, self.plan_name, self.created_at
        )
    }
}
