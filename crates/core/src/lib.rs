mod paths;
mod provider;

pub mod chat;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod model;
pub mod prompts;
pub mod resource;

pub use crate::paths::AppDir;
pub use crate::provider::llm::{connect, get_completion_llm};
pub use crate::provider::test_provider::TestProviderModel;
