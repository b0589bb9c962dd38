use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use pricebot_core::{NewPricingRecord, PricingRecord};

use crate::repositories::{PricingRepository, RepositoryError};
use crate::DbPool;

const SEARCH_RESULT_LIMIT: i64 = 20;

const RECORD_COLUMNS: &str = "id, company_name, plan_name, input_token_cost, output_token_cost, \
     currency, billing_period, features, limitations, source_query, created_at";

/// SQLite-backed pricing record store.
pub struct SqlPricingRepository {
    pool: DbPool,
}

impl SqlPricingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &SqliteRow) -> Result<PricingRecord, RepositoryError> {
        let features_json: Option<String> = row.try_get("features")?;
        let features = match features_json.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid features payload: {error}"))
            })?,
            _ => Vec::new(),
        };

        Ok(PricingRecord {
            id: row.try_get("id")?,
            company_name: row.try_get("company_name")?,
            plan_name: row.try_get("plan_name")?,
            input_token_cost: row.try_get("input_token_cost")?,
            output_token_cost: row.try_get("output_token_cost")?,
            currency: row.try_get::<Option<String>, _>("currency")?.unwrap_or_default(),
            billing_period: row.try_get::<Option<String>, _>("billing_period")?.unwrap_or_default(),
            features,
            limitations: row.try_get::<Option<String>, _>("limitations")?.unwrap_or_default(),
            source_query: row.try_get::<Option<String>, _>("source_query")?.unwrap_or_default(),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl PricingRepository for SqlPricingRepository {
    async fn insert(&self, record: NewPricingRecord) -> Result<i64, RepositoryError> {
        let features_json = serde_json::to_string(&record.features)
            .map_err(|error| RepositoryError::Decode(format!("features encoding: {error}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO pricing_records (
                company_name, plan_name, input_token_cost, output_token_cost,
                currency, billing_period, features, limitations, source_query
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.company_name)
        .bind(&record.plan_name)
        .bind(record.input_token_cost)
        .bind(record.output_token_cost)
        .bind(&record.currency)
        .bind(&record.billing_period)
        .bind(features_json)
        .bind(&record.limitations)
        .bind(&record.source_query)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn search(&self, terms: &[String]) -> Result<Vec<PricingRecord>, RepositoryError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let clause = "(company_name LIKE ? COLLATE NOCASE \
             OR plan_name LIKE ? COLLATE NOCASE \
             OR source_query LIKE ? COLLATE NOCASE)";
        let clauses = vec![clause; terms.len()].join(" OR ");
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM pricing_records \
             WHERE {clauses} \
             ORDER BY created_at DESC, id DESC LIMIT {SEARCH_RESULT_LIMIT}"
        );

        let mut query = sqlx::query(&sql);
        for term in terms {
            let pattern = format!("%{term}%");
            query = query.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn recent(&self, limit: u32) -> Result<Vec<PricingRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM pricing_records \
             ORDER BY created_at DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql).bind(i64::from(limit)).fetch_all(&self.pool).await?;
        rows.iter().map(Self::record_from_row).collect()
    }
}
