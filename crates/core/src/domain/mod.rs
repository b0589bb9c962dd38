pub mod conversation;
pub mod pricing;
pub mod tool;
