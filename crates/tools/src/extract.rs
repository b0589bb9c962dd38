use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use pricebot_core::ToolSpec;

use crate::server::{Tool, ToolError};
use crate::EXTRACT_TOOL;

/// One pricing plan pulled out of raw page content. Mirrors the persisted
/// record minus the source query, which only the orchestrator knows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPlan {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub plan_name: String,
    #[serde(default)]
    pub input_token_cost: Option<f64>,
    #[serde(default)]
    pub output_token_cost: Option<f64>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub billing_period: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub limitations: String,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction request failed: {0}")]
    Completion(String),
    #[error("malformed extraction output: {0}")]
    Malformed(String),
}

/// Turns raw page content into structured plans. The production
/// implementation prompts the Completion Service; tests use canned output.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        content: &str,
        hint: Option<&str>,
    ) -> Result<Vec<ExtractedPlan>, ExtractError>;
}

/// Extraction Tool: takes raw content plus an optional hint describing what
/// to look for, and returns `{"plans": [...]}`.
pub struct ExtractTool {
    extractor: Arc<dyn Extractor>,
}

#[derive(Debug, Deserialize)]
struct ExtractArgs {
    content: String,
    #[serde(default)]
    hint: Option<String>,
}

impl ExtractTool {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Tool for ExtractTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: EXTRACT_TOOL.to_string(),
            description: "Extract structured LLM inference pricing plans \
                 (company, plan, token costs, currency, billing period, features, \
                 limitations) from scraped page content."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "Raw page content (markdown or text) to extract from"
                    },
                    "hint": {
                        "type": "string",
                        "description": "Optional hint describing which plans or fields to focus on"
                    }
                },
                "required": ["content"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: ExtractArgs =
            serde_json::from_value(arguments).map_err(|error| ToolError::InvalidArguments {
                tool: EXTRACT_TOOL.to_string(),
                reason: error.to_string(),
            })?;
        if args.content.trim().is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: EXTRACT_TOOL.to_string(),
                reason: "content must not be empty".to_string(),
            });
        }

        let plans = self
            .extractor
            .extract(&args.content, args.hint.as_deref())
            .await
            .map_err(|error| ToolError::Upstream {
                tool: EXTRACT_TOOL.to_string(),
                reason: error.to_string(),
            })?;

        info!(
            event_name = "tools.extract.completed",
            plan_count = plans.len(),
            "extraction produced structured plans"
        );
        Ok(json!({ "plans": plans }))
    }
}
