use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use pricebot_core::ChatTurn;
use pricebot_tools::{ExtractError, ExtractedPlan, Extractor};

use crate::llm::CompletionClient;

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract LLM inference pricing from web page \
     content. Respond with a single JSON object and nothing else, shaped as \
     {\"plans\": [...]}. Each plan has: company_name, plan_name, \
     input_token_cost (USD per 1M tokens, number or null), output_token_cost \
     (same), currency, billing_period, features (array of strings), \
     limitations. Only include plans actually present in the content; use \
     null or empty values for fields the page does not state.";

/// Backs the extraction tool with the Completion Service: prompts the model
/// for JSON-only output and decodes it into structured plans.
pub struct LlmExtractor {
    completion: Arc<dyn CompletionClient>,
}

#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    plans: Vec<ExtractedPlan>,
}

impl LlmExtractor {
    pub fn new(completion: Arc<dyn CompletionClient>) -> Self {
        Self { completion }
    }

    fn request_turns(content: &str, hint: Option<&str>) -> Vec<ChatTurn> {
        let mut request = String::new();
        if let Some(hint) = hint {
            request.push_str("Focus on: ");
            request.push_str(hint);
            request.push_str("\n\n");
        }
        request.push_str(content);
        vec![ChatTurn::system(EXTRACTION_SYSTEM_PROMPT), ChatTurn::user(request)]
    }

    fn decode_plans(text: &str) -> Result<Vec<ExtractedPlan>, ExtractError> {
        let body = strip_code_fences(text);
        let payload: ExtractionPayload = serde_json::from_str(body)
            .map_err(|error| ExtractError::Malformed(error.to_string()))?;
        Ok(payload.plans)
    }
}

/// Models often wrap JSON output in a markdown code fence despite the
/// JSON-only instruction. Strip one outer fence if present.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        content: &str,
        hint: Option<&str>,
    ) -> Result<Vec<ExtractedPlan>, ExtractError> {
        let turns = Self::request_turns(content, hint);
        let reply = self
            .completion
            .complete(&turns, &[])
            .await
            .map_err(|error| ExtractError::Completion(error.to_string()))?;
        let text = reply
            .content
            .ok_or_else(|| ExtractError::Malformed("reply carried no content".to_string()))?;

        let plans = Self::decode_plans(&text)?;
        debug!(
            event_name = "extractor.decoded",
            plan_count = plans.len(),
            "decoded extraction reply"
        );
        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use pricebot_core::{ChatTurn, Role, ToolSpec};
    use pricebot_tools::{ExtractError, Extractor};

    use super::{strip_code_fences, LlmExtractor};
    use crate::llm::{CompletionClient, CompletionError, CompletionReply};

    struct CannedCompletion {
        reply: &'static str,
    }

    #[async_trait]
    impl CompletionClient for CannedCompletion {
        async fn complete(
            &self,
            _turns: &[ChatTurn],
            _tools: &[ToolSpec],
        ) -> Result<CompletionReply, CompletionError> {
            Ok(CompletionReply { content: Some(self.reply.to_string()), tool_calls: Vec::new() })
        }
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"plans\": []}\n```"), "{\"plans\": []}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {\"plans\": []} "), "{\"plans\": []}");
    }

    #[test]
    fn hint_is_prepended_to_the_request() {
        let turns = LlmExtractor::request_turns("# Pricing page", Some("deepseek v3"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::System);
        assert!(turns[1].content.starts_with("Focus on: deepseek v3"));
        assert!(turns[1].content.ends_with("# Pricing page"));
    }

    #[tokio::test]
    async fn fenced_json_reply_decodes_to_plans() {
        let extractor = LlmExtractor::new(Arc::new(CannedCompletion {
            reply: "```json\n{\"plans\": [{\"company_name\": \"CloudRift\", \
                     \"plan_name\": \"DeepSeek V3\", \"input_token_cost\": 0.25, \
                     \"output_token_cost\": 1.0, \"currency\": \"USD\"}]}\n```",
        }));

        let plans = extractor.extract("# Pricing", None).await.expect("plans");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].company_name, "CloudRift");
        assert_eq!(plans[0].input_token_cost, Some(0.25));
    }

    #[tokio::test]
    async fn missing_plans_key_yields_no_plans() {
        let extractor = LlmExtractor::new(Arc::new(CannedCompletion { reply: "{}" }));
        let plans = extractor.extract("# Pricing", None).await.expect("plans");
        assert!(plans.is_empty());
    }

    #[tokio::test]
    async fn prose_reply_is_a_malformed_error() {
        let extractor = LlmExtractor::new(Arc::new(CannedCompletion {
            reply: "I could not find any pricing information.",
        }));
        let error = extractor.extract("# Pricing", None).await.expect_err("malformed");
        assert!(matches!(error, ExtractError::Malformed(_)));
    }
}
