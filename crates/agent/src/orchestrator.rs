use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tracing::{info, warn};

use pricebot_core::{ChatSession, ChatTurn, NewPricingRecord, ToolCallRequest};
use pricebot_db::PricingRepository;
use pricebot_tools::{ExtractedPlan, ToolServer, EXTRACT_TOOL};

use crate::llm::CompletionClient;
use crate::rate::RateGate;

const CHAT_SYSTEM_PROMPT: &str = "You are a pricing research assistant for LLM inference \
     providers. When the user asks about a provider's pricing, scrape the relevant pricing \
     page, extract the structured plans, and answer with concrete numbers. If cached pricing \
     data is available, prefer it over scraping the same page again. Be concise and always \
     name the provider and plan you are quoting.";

const BUDGET_EXHAUSTED_PROMPT: &str = "The tool budget for this request is exhausted. \
     Answer the user now from the information gathered so far, and say what is missing \
     if the answer is incomplete.";

/// Words too generic to be useful cache probes.
const STOPWORDS: &[&str] = &[
    "the", "and", "are", "for", "you", "what", "whats", "how", "much", "many", "does", "with",
    "about", "per", "cost", "costs", "price", "prices", "pricing", "token", "tokens", "charge",
    "charges", "model", "models", "inference", "their", "there", "them", "tell",
];

/// Drives one user message to completion: probes the cache, loops the
/// Completion Service against the Tool Server under a bounded budget, and
/// persists whatever pricing the extraction tool produces.
pub struct Orchestrator {
    completion: Arc<dyn CompletionClient>,
    tools: ToolServer,
    store: Arc<dyn PricingRepository>,
    max_tool_turns: u32,
    rate_gate: RateGate,
}

impl Orchestrator {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        tools: ToolServer,
        store: Arc<dyn PricingRepository>,
        max_tool_turns: u32,
        min_tool_interval: Duration,
    ) -> Self {
        Self { completion, tools, store, max_tool_turns, rate_gate: RateGate::new(min_tool_interval) }
    }

    /// Handles one user message. Returns `Ok(None)` for blank input, which
    /// does not touch the session. Tool and store failures inside the loop
    /// are reported back to the model as tool output; only Completion
    /// Service failures abort the turn.
    pub async fn handle_user_message(
        &self,
        session: &mut ChatSession,
        text: &str,
    ) -> anyhow::Result<Option<String>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        if session.is_empty() {
            session.push(ChatTurn::system(CHAT_SYSTEM_PROMPT));
        }
        session.push(ChatTurn::user(trimmed));
        if let Some(hint) = self.cache_hint(trimmed).await {
            info!(event_name = "orchestrator.cache_hit", "cached pricing data matched the query");
            session.push(ChatTurn::system(hint));
        }

        let catalog = self.tools.list_tools();
        for _ in 0..self.max_tool_turns {
            let reply = self
                .completion
                .complete(session.turns(), &catalog)
                .await
                .context("completion request failed")?;

            if !reply.has_tool_calls() {
                let answer = reply.content.unwrap_or_default();
                session.push(ChatTurn::assistant(answer.clone()));
                return Ok(Some(answer));
            }

            let calls = reply.tool_calls.clone();
            session.push(ChatTurn::assistant_tool_calls(reply.content, reply.tool_calls));
            for call in &calls {
                self.rate_gate.wait().await;
                session.push(self.run_tool_call(call, trimmed).await);
            }
        }

        // Budget exhausted: one last completion without tools so the model
        // has to answer from what it gathered.
        warn!(
            event_name = "orchestrator.budget_exhausted",
            max_tool_turns = self.max_tool_turns,
            "tool budget exhausted, forcing a final answer"
        );
        session.push(ChatTurn::system(BUDGET_EXHAUSTED_PROMPT));
        let reply = self
            .completion
            .complete(session.turns(), &[])
            .await
            .context("final completion request failed")?;
        let answer = reply
            .content
            .unwrap_or_else(|| "I could not gather enough information to answer.".to_string());
        session.push(ChatTurn::assistant(answer.clone()));
        Ok(Some(answer))
    }

    async fn run_tool_call(&self, call: &ToolCallRequest, source_query: &str) -> ChatTurn {
        info!(event_name = "orchestrator.tool_call", tool = %call.name, "invoking tool");
        match self.tools.call_tool(&call.name, call.arguments.clone()).await {
            Ok(result) => {
                if call.name == EXTRACT_TOOL {
                    if let Err(error) = self.persist_plans(&result, source_query).await {
                        warn!(
                            event_name = "orchestrator.persist_failed",
                            error = %error,
                            "failed to persist extracted pricing"
                        );
                        return ChatTurn::tool(
                            &call.id,
                            format!("tool error: extracted pricing could not be saved: {error}"),
                        );
                    }
                }
                ChatTurn::tool(&call.id, result.to_string())
            }
            Err(error) => {
                warn!(
                    event_name = "orchestrator.tool_failed",
                    tool = %call.name,
                    error = %error,
                    "tool call failed"
                );
                ChatTurn::tool(&call.id, format!("tool error: {error}"))
            }
        }
    }

    /// Persists every valid plan in an extraction result, stamped with the
    /// user query that led to it. Invalid plans are skipped, not fatal.
    async fn persist_plans(&self, result: &Value, source_query: &str) -> anyhow::Result<usize> {
        let plans: Vec<ExtractedPlan> = match result.get("plans") {
            Some(plans) => serde_json::from_value(plans.clone())
                .context("extraction result carried malformed plans")?,
            None => Vec::new(),
        };

        let mut inserted = 0;
        let mut skipped = 0;
        for plan in plans {
            let record = NewPricingRecord {
                company_name: plan.company_name,
                plan_name: plan.plan_name,
                input_token_cost: plan.input_token_cost,
                output_token_cost: plan.output_token_cost,
                currency: plan.currency,
                billing_period: plan.billing_period,
                features: plan.features,
                limitations: plan.limitations,
                source_query: source_query.to_string(),
            };
            if record.validate().is_err() {
                skipped += 1;
                continue;
            }
            let id = self.store.insert(record).await.context("pricing insert failed")?;
            info!(event_name = "orchestrator.record_saved", record_id = id, "saved pricing record");
            inserted += 1;
        }
        if skipped > 0 {
            warn!(
                event_name = "orchestrator.plans_skipped",
                skipped,
                "skipped plans without a company or plan name"
            );
        }
        Ok(inserted)
    }

    /// Probes the store for records matching the query. A hit becomes an
    /// advisory system turn; the model still decides whether to scrape. A
    /// probe failure is logged and ignored, the turn proceeds without a hint.
    async fn cache_hint(&self, text: &str) -> Option<String> {
        let terms = search_terms(text);
        if terms.is_empty() {
            return None;
        }
        match self.store.search(&terms).await {
            Ok(records) if !records.is_empty() => {
                let mut plans: Vec<String> = records
                    .iter()
                    .map(|record| format!("{} / {}", record.company_name, record.plan_name))
                    .collect();
                plans.sort();
                plans.dedup();
                Some(format!(
                    "Cached pricing data already exists for: {}. Prefer answering from it \
                     instead of scraping again; the user can run `show data` to see it.",
                    plans.join(", ")
                ))
            }
            Ok(_) => None,
            Err(error) => {
                warn!(
                    event_name = "orchestrator.cache_probe_failed",
                    error = %error,
                    "cache probe failed, continuing without a hint"
                );
                None
            }
        }
    }
}

/// Lowercased distinctive words from the query, used as LIKE probes against
/// the store. Short words and generic pricing vocabulary are dropped.
fn search_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() < 3 || STOPWORDS.contains(&word.as_str()) || terms.contains(&word) {
            continue;
        }
        terms.push(word);
        if terms.len() == 8 {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use pricebot_core::{ChatSession, ChatTurn, NewPricingRecord, Role, ToolCallRequest, ToolSpec};
    use pricebot_db::{InMemoryPricingRepository, PricingRepository};
    use pricebot_tools::{
        ExtractError, ExtractTool, ExtractedPlan, Extractor, Tool, ToolError, ToolServer,
    };

    use super::{search_terms, Orchestrator};
    use crate::llm::{CompletionClient, CompletionError, CompletionReply};

    /// Completion Service double that pops scripted replies and records what
    /// each request looked like.
    struct ScriptedCompletion {
        script: Mutex<VecDeque<Result<CompletionReply, CompletionError>>>,
        requests: Mutex<Vec<(Vec<ChatTurn>, usize)>>,
    }

    impl ScriptedCompletion {
        fn new(script: Vec<Result<CompletionReply, CompletionError>>) -> Self {
            Self { script: Mutex::new(script.into()), requests: Mutex::new(Vec::new()) }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn requests(&self) -> Vec<(Vec<ChatTurn>, usize)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn complete(
            &self,
            turns: &[ChatTurn],
            tools: &[ToolSpec],
        ) -> Result<CompletionReply, CompletionError> {
            self.requests.lock().unwrap().push((turns.to_vec(), tools.len()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(CompletionError::MissingChoice))
        }
    }

    fn text_reply(text: &str) -> Result<CompletionReply, CompletionError> {
        Ok(CompletionReply { content: Some(text.to_string()), tool_calls: Vec::new() })
    }

    fn tool_call_reply(id: &str, name: &str, arguments: Value) -> Result<CompletionReply, CompletionError> {
        Ok(CompletionReply {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }],
        })
    }

    /// Stands in for the scraping tool without any network access.
    struct FakeScrapeTool {
        calls: Arc<AtomicU32>,
        outcome: Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl Tool for FakeScrapeTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "scrape_website".to_string(),
                description: "Fetch a page as markdown".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn call(&self, _arguments: Value) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Ok(markdown) => Ok(json!({"url": "https://example.com", "markdown": markdown})),
                Err(reason) => Err(ToolError::Upstream {
                    tool: "scrape_website".to_string(),
                    reason: reason.to_string(),
                }),
            }
        }
    }

    struct CannedExtractor {
        plans: Vec<ExtractedPlan>,
    }

    #[async_trait]
    impl Extractor for CannedExtractor {
        async fn extract(
            &self,
            _content: &str,
            _hint: Option<&str>,
        ) -> Result<Vec<ExtractedPlan>, ExtractError> {
            Ok(self.plans.clone())
        }
    }

    fn orchestrator_with(
        script: Vec<Result<CompletionReply, CompletionError>>,
        tools: ToolServer,
        store: Arc<InMemoryPricingRepository>,
        max_tool_turns: u32,
    ) -> (Orchestrator, Arc<ScriptedCompletion>) {
        let completion = Arc::new(ScriptedCompletion::new(script));
        let orchestrator = Orchestrator::new(
            completion.clone(),
            tools,
            store,
            max_tool_turns,
            Duration::ZERO,
        );
        (orchestrator, completion)
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let (orchestrator, completion) = orchestrator_with(
            Vec::new(),
            ToolServer::new(),
            Arc::new(InMemoryPricingRepository::new()),
            4,
        );
        let mut session = ChatSession::new();

        let answer = orchestrator.handle_user_message(&mut session, "   ").await.expect("handle");

        assert!(answer.is_none());
        assert!(session.is_empty());
        assert_eq!(completion.request_count(), 0);
    }

    #[tokio::test]
    async fn direct_answer_needs_one_completion_round() {
        let (orchestrator, completion) = orchestrator_with(
            vec![text_reply("Hello! Ask me about LLM pricing.")],
            ToolServer::new(),
            Arc::new(InMemoryPricingRepository::new()),
            4,
        );
        let mut session = ChatSession::new();

        let answer = orchestrator
            .handle_user_message(&mut session, "hi there")
            .await
            .expect("handle")
            .expect("answer");

        assert_eq!(answer, "Hello! Ask me about LLM pricing.");
        assert_eq!(completion.request_count(), 1);
        let roles: Vec<Role> = session.turns().iter().map(|turn| turn.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn scrape_then_extract_persists_records_and_answers() {
        let scrape_calls = Arc::new(AtomicU32::new(0));
        let mut tools = ToolServer::new();
        tools.register(FakeScrapeTool {
            calls: scrape_calls.clone(),
            outcome: Ok("# Pricing\nDeepSeek V3: $0.25 in / $1.00 out"),
        });
        tools.register(ExtractTool::new(Arc::new(CannedExtractor {
            plans: vec![ExtractedPlan {
                company_name: "CloudRift".to_string(),
                plan_name: "DeepSeek V3".to_string(),
                input_token_cost: Some(0.25),
                output_token_cost: Some(1.0),
                currency: "USD".to_string(),
                ..Default::default()
            }],
        })));

        let store = Arc::new(InMemoryPricingRepository::new());
        let (orchestrator, _completion) = orchestrator_with(
            vec![
                tool_call_reply("call_1", "scrape_website", json!({"url": "https://www.cloudrift.ai/inference"})),
                tool_call_reply("call_2", "extract_pricing", json!({"content": "# Pricing"})),
                text_reply("CloudRift charges $0.25 per 1M input tokens for DeepSeek V3."),
            ],
            tools,
            store.clone(),
            4,
        );
        let mut session = ChatSession::new();

        let answer = orchestrator
            .handle_user_message(&mut session, "how much does cloudrift charge for deepseek v3?")
            .await
            .expect("handle")
            .expect("answer");

        assert!(answer.contains("$0.25"));
        assert_eq!(scrape_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.record_count(), 1);
        let saved = store.recent(1).await.expect("recent");
        assert_eq!(saved[0].company_name, "CloudRift");
        assert_eq!(saved[0].source_query, "how much does cloudrift charge for deepseek v3?");

        let roles: Vec<Role> = session.turns().iter().map(|turn| turn.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
            ]
        );
    }

    #[tokio::test]
    async fn invalid_plans_are_skipped_on_persist() {
        let mut tools = ToolServer::new();
        tools.register(ExtractTool::new(Arc::new(CannedExtractor {
            plans: vec![
                ExtractedPlan { company_name: "CloudRift".to_string(), ..Default::default() },
                ExtractedPlan::default(),
            ],
        })));

        let store = Arc::new(InMemoryPricingRepository::new());
        let (orchestrator, _completion) = orchestrator_with(
            vec![
                tool_call_reply("call_1", "extract_pricing", json!({"content": "# Pricing"})),
                text_reply("done"),
            ],
            tools,
            store.clone(),
            4,
        );
        let mut session = ChatSession::new();

        orchestrator
            .handle_user_message(&mut session, "cloudrift pricing please")
            .await
            .expect("handle");

        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn tool_failure_feeds_an_error_turn_and_the_session_continues() {
        let scrape_calls = Arc::new(AtomicU32::new(0));
        let mut tools = ToolServer::new();
        tools.register(FakeScrapeTool {
            calls: scrape_calls.clone(),
            outcome: Err("page not reachable"),
        });

        let (orchestrator, completion) = orchestrator_with(
            vec![
                tool_call_reply("call_1", "scrape_website", json!({"url": "https://example.com"})),
                text_reply("I could not reach the pricing page."),
            ],
            tools,
            Arc::new(InMemoryPricingRepository::new()),
            4,
        );
        let mut session = ChatSession::new();

        let answer = orchestrator
            .handle_user_message(&mut session, "scrape example.com pricing")
            .await
            .expect("handle")
            .expect("answer");

        assert_eq!(answer, "I could not reach the pricing page.");
        assert_eq!(completion.request_count(), 2);
        let error_turn = session
            .turns()
            .iter()
            .find(|turn| turn.role == Role::Tool)
            .expect("tool turn");
        assert!(error_turn.content.contains("tool error"));
        assert!(error_turn.content.contains("page not reachable"));
    }

    #[tokio::test]
    async fn unknown_tool_request_becomes_an_error_turn() {
        let (orchestrator, _completion) = orchestrator_with(
            vec![
                tool_call_reply("call_1", "does_not_exist", json!({})),
                text_reply("sorry, that capability is unavailable"),
            ],
            ToolServer::new(),
            Arc::new(InMemoryPricingRepository::new()),
            4,
        );
        let mut session = ChatSession::new();

        orchestrator.handle_user_message(&mut session, "do the thing").await.expect("handle");

        let error_turn = session
            .turns()
            .iter()
            .find(|turn| turn.role == Role::Tool)
            .expect("tool turn");
        assert!(error_turn.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn cached_records_surface_as_a_system_hint() {
        let store = Arc::new(InMemoryPricingRepository::new());
        store
            .insert(NewPricingRecord {
                company_name: "CloudRift".to_string(),
                plan_name: "DeepSeek V3".to_string(),
                source_query: "cloudrift deepseek".to_string(),
                ..Default::default()
            })
            .await
            .expect("seed record");

        let (orchestrator, completion) = orchestrator_with(
            vec![text_reply("From cached data: DeepSeek V3 on CloudRift...")],
            ToolServer::new(),
            store,
            4,
        );
        let mut session = ChatSession::new();

        orchestrator
            .handle_user_message(&mut session, "what does cloudrift charge?")
            .await
            .expect("handle");

        let hint = session
            .turns()
            .iter()
            .find(|turn| turn.role == Role::System && turn.content.contains("Cached pricing"))
            .expect("cache hint turn");
        assert!(hint.content.contains("CloudRift / DeepSeek V3"));

        // the hint was part of the request the model saw
        let (turns, _) = &completion.requests()[0];
        assert!(turns.iter().any(|turn| turn.content.contains("Cached pricing")));
    }

    #[tokio::test]
    async fn no_hint_when_the_cache_misses() {
        let (orchestrator, _completion) = orchestrator_with(
            vec![text_reply("no data yet")],
            ToolServer::new(),
            Arc::new(InMemoryPricingRepository::new()),
            4,
        );
        let mut session = ChatSession::new();

        orchestrator
            .handle_user_message(&mut session, "what does mistral charge?")
            .await
            .expect("handle");

        assert!(session
            .turns()
            .iter()
            .all(|turn| !turn.content.contains("Cached pricing")));
    }

    #[tokio::test]
    async fn exhausted_budget_forces_a_final_answer_without_tools() {
        let scrape_calls = Arc::new(AtomicU32::new(0));
        let mut tools = ToolServer::new();
        tools.register(FakeScrapeTool { calls: scrape_calls.clone(), outcome: Ok("# Pricing") });

        let (orchestrator, completion) = orchestrator_with(
            vec![
                tool_call_reply("call_1", "scrape_website", json!({"url": "https://a.example"})),
                tool_call_reply("call_2", "scrape_website", json!({"url": "https://b.example"})),
                text_reply("Best effort: here is what I found so far."),
            ],
            tools,
            Arc::new(InMemoryPricingRepository::new()),
            2,
        );
        let mut session = ChatSession::new();

        let answer = orchestrator
            .handle_user_message(&mut session, "compare every provider's pricing")
            .await
            .expect("handle")
            .expect("answer");

        assert_eq!(answer, "Best effort: here is what I found so far.");
        assert_eq!(scrape_calls.load(Ordering::SeqCst), 2);
        assert_eq!(completion.request_count(), 3);

        // the forced final round advertises no tools
        let requests = completion.requests();
        assert_eq!(requests[0].1, 1);
        assert_eq!(requests[2].1, 0);
        assert!(requests[2]
            .0
            .iter()
            .any(|turn| turn.role == Role::System && turn.content.contains("budget")));
    }

    #[tokio::test]
    async fn completion_failure_aborts_the_turn() {
        let (orchestrator, _completion) = orchestrator_with(
            vec![Err(CompletionError::Api { status: 500, body: "upstream down".to_string() })],
            ToolServer::new(),
            Arc::new(InMemoryPricingRepository::new()),
            4,
        );
        let mut session = ChatSession::new();

        let error = orchestrator
            .handle_user_message(&mut session, "hello")
            .await
            .expect_err("completion failure");
        assert!(format!("{error:#}").contains("completion request failed"));
    }

    #[test]
    fn search_terms_drop_short_and_generic_words() {
        let terms = search_terms("How much does CloudRift charge for DeepSeek V3 tokens?");
        assert_eq!(terms, vec!["cloudrift", "deepseek"]);
    }

    #[test]
    fn search_terms_deduplicate() {
        let terms = search_terms("anthropic anthropic claude");
        assert_eq!(terms, vec!["anthropic", "claude"]);
    }
}
