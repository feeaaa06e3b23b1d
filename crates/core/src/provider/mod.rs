pub mod llm;
pub mod openai;
mod openai_types;
pub mod test_provider;
