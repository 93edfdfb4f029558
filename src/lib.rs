//! taskchat library crate
//!
//! A conversational to-do list: free-form requests go to an LLM together with
//! the current nested list, and the reply either replaces the list or is shown
//! as an answer.

pub mod api;
pub mod bridge;
pub mod cli;
pub mod interpret;
pub mod llm;
pub mod models;
pub mod session;

pub use session::Core;
