pub mod app;
pub mod catalog;
pub mod cli;
pub mod compliance;
pub mod config;
pub mod document_processor;
pub mod error_handler;
pub mod extractor;
pub mod llm;
pub mod models;
pub mod progress;
pub mod scoring;
pub mod session;
pub mod template_engine;
pub mod test_generator;
pub mod validator;
pub mod workflow;
