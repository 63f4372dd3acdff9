// Summary generation for content items: pipeline, stores, access control and
// the HTTP surface. The `synopsis` binary and the integration tests build on it.

pub mod auth;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod service;
pub mod settings;
pub mod storage;
pub mod text;
