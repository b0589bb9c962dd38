use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use pricebot_core::ToolSpec;

use crate::server::{Tool, ToolError};
use crate::SCRAPE_TOOL;

/// Scraping Tool backed by a Firecrawl-style HTTP API: takes a URL and
/// returns the page rendered as markdown. Stateless and idempotent per URL.
pub struct ScrapeTool {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ScrapeArgs {
    url: String,
}

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    metadata: Option<ScrapeMetadata>,
}

#[derive(Debug, Deserialize)]
struct ScrapeMetadata {
    title: Option<String>,
}

impl ScrapeTool {
    pub fn new(client: reqwest::Client, api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self { client, api_key, base_url: base_url.into() }
    }

    fn upstream(reason: impl Into<String>) -> ToolError {
        ToolError::Upstream { tool: SCRAPE_TOOL.to_string(), reason: reason.into() }
    }

    fn result_from_response(url: &str, response: ScrapeResponse) -> Result<Value, ToolError> {
        if !response.success {
            let reason = response.error.unwrap_or_else(|| "scrape was not successful".to_string());
            return Err(Self::upstream(reason));
        }

        let data = response.data.ok_or_else(|| Self::upstream("response carried no data"))?;
        let markdown = data
            .markdown
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Self::upstream("response carried no markdown content"))?;
        let title = data.metadata.and_then(|metadata| metadata.title).unwrap_or_default();

        Ok(json!({ "url": url, "title": title, "markdown": markdown }))
    }
}

#[async_trait]
impl Tool for ScrapeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: SCRAPE_TOOL.to_string(),
            description: "Fetch a web page and return its content as markdown. \
                 Use this to read an AI provider's pricing page."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Absolute URL of the page to scrape"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: ScrapeArgs =
            serde_json::from_value(arguments).map_err(|error| ToolError::InvalidArguments {
                tool: SCRAPE_TOOL.to_string(),
                reason: error.to_string(),
            })?;
        if args.url.trim().is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: SCRAPE_TOOL.to_string(),
                reason: "url must not be empty".to_string(),
            });
        }

        info!(event_name = "tools.scrape.request", url = %args.url, "scraping page");

        let endpoint = format!("{}/v1/scrape", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&ScrapeRequest { url: &args.url, formats: &["markdown"] })
            .send()
            .await
            .map_err(|error| Self::upstream(format!("transport error: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::upstream(format!("HTTP {status}: {body}")));
        }

        let payload: ScrapeResponse = response
            .json()
            .await
            .map_err(|error| Self::upstream(format!("invalid response payload: {error}")))?;

        Self::result_from_response(&args.url, payload)
    }
}
