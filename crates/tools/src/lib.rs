//! Tool Server: exposes the scraping and extraction capabilities behind a
//! uniform list-tools / call-tool interface consumed by the orchestrator.

pub mod extract;
pub mod scrape;
pub mod server;

pub use extract::{ExtractError, ExtractTool, ExtractedPlan, Extractor};
pub use scrape::ScrapeTool;
pub use server::{Tool, ToolError, ToolServer};

/// Catalog names. The orchestrator matches on these when deciding whether a
/// tool result carries structured pricing data.
pub const SCRAPE_TOOL: &str = "scrape_website";
pub const EXTRACT_TOOL: &str = "extract_pricing";
