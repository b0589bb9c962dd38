use std::sync::Mutex;

use async_trait::async_trait;

use pricebot_core::{NewPricingRecord, PricingRecord};

use crate::repositories::{PricingRepository, RepositoryError};

/// In-memory pricing store used by orchestrator tests.
#[derive(Default)]
pub struct InMemoryPricingRepository {
    records: Mutex<Vec<PricingRecord>>,
}

impl InMemoryPricingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PricingRepository for InMemoryPricingRepository {
    async fn insert(&self, record: NewPricingRecord) -> Result<i64, RepositoryError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Decode("records mutex poisoned".to_string()))?;
        let id = records.len() as i64 + 1;
        records.push(PricingRecord {
            id,
            company_name: record.company_name,
            plan_name: record.plan_name,
            input_token_cost: record.input_token_cost,
            output_token_cost: record.output_token_cost,
            currency: record.currency,
            billing_period: record.billing_period,
            features: record.features,
            limitations: record.limitations,
            source_query: record.source_query,
            created_at: format!("row-{id}"),
        });
        Ok(id)
    }

    async fn search(&self, terms: &[String]) -> Result<Vec<PricingRecord>, RepositoryError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Decode("records mutex poisoned".to_string()))?;
        let matches = records
            .iter()
            .rev()
            .filter(|record| {
                let company = record.company_name.to_lowercase();
                let plan = record.plan_name.to_lowercase();
                let source = record.source_query.to_lowercase();
                terms.iter().any(|term| {
                    let needle = term.to_lowercase();
                    company.contains(&needle) || plan.contains(&needle) || source.contains(&needle)
                })
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn recent(&self, limit: u32) -> Result<Vec<PricingRecord>, RepositoryError> {
        let records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Decode("records mutex poisoned".to_string()))?;
        Ok(records.iter().rev().take(limit as usize).cloned().collect())
    }
}
