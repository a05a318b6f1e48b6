pub mod advisor;
pub mod analysis;
pub mod config;
pub mod core;
pub mod extractor;
pub mod feedback;
pub mod llm;
pub mod reply;

pub use advisor::ReplyAdvisor;
pub use config::Settings;
pub use core::{RelioError, Result};
