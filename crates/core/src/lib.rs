pub mod config;
pub mod domain;
pub mod errors;

pub use domain::conversation::{ChatSession, ChatTurn, Role};
pub use domain::pricing::{NewPricingRecord, PricingRecord};
pub use domain::tool::{ToolCallRequest, ToolSpec};
pub use errors::DomainError;
