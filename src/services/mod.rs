pub mod connection_pool;
pub mod export_packager;
pub mod generator;
pub mod llm_service;
pub mod prompt_compiler;
pub mod response_parser;
pub mod schema_reader;
pub mod translation_cache; // Fingerprint cache with single-flight, LRU and TTL
pub mod translation_service;

pub use connection_pool::*;
pub use export_packager::*;
pub use generator::*;
pub use llm_service::*;
pub use prompt_compiler::*;
pub use schema_reader::*;
pub use translation_cache::*;
pub use translation_service::*;
