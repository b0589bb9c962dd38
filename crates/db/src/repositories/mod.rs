use async_trait::async_trait;
use thiserror::Error;

use pricebot_core::{NewPricingRecord, PricingRecord};

pub mod memory;
pub mod pricing;

pub use memory::InMemoryPricingRepository;
pub use pricing::SqlPricingRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Store access for pricing records: insert, approximate search, and a
/// recency dump. Records are never updated or deleted.
#[async_trait]
pub trait PricingRepository: Send + Sync {
    /// Insert one record and return its assigned identifier.
    async fn insert(&self, record: NewPricingRecord) -> Result<i64, RepositoryError>;

    /// Case-insensitive substring match of any term against company name,
    /// plan name, or source query. Empty input yields no matches.
    async fn search(&self, terms: &[String]) -> Result<Vec<PricingRecord>, RepositoryError>;

    /// The most recently created records, newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<PricingRecord>, RepositoryError>;
}
