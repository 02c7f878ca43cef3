pub mod chapters;
pub mod config;
pub mod glossary;
pub mod groups;
pub mod llm;
pub mod pipeline;
pub mod placeholders;
pub mod progress;
pub mod project;
pub mod prompts;
pub mod segment;
pub mod sentences;
pub mod store;
pub mod textutil;
