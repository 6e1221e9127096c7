//! Thaum ingests a source repository and produces a hierarchical,
//! LLM-generated compression of every function and class in it. The facade
//! below is the whole surface external collaborators drive; everything
//! interesting lives in the modules underneath.

pub mod application;
pub mod compression;
pub mod db;
pub mod llm;
pub mod parsing;
pub mod prompts;
pub mod repo;

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use application::application::{Application, ApplicationError};
use application::config::configuration::Configuration;
use compression::compressor::CompressionError;
use compression::tracer::TraceSink;
use parsing::extractor::{ExtractorError, SymbolExtractor};
use parsing::hierarchy::HierarchyAssembler;
use parsing::types::{CodeSymbol, SymbolHierarchy, SymbolMap};

#[derive(Debug, thiserror::Error)]
pub enum ThaumError {
    #[error(transparent)]
    Application(#[from] ApplicationError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Extraction(#[from] ExtractorError),
}

/// Run the full pipeline over a project: crawl, six compression phases,
/// hierarchy assembly. This is what the CLI calls.
pub async fn process_codebase(
    config: Configuration,
    tracer: Arc<dyn TraceSink>,
    cancellation: CancellationToken,
) -> Result<SymbolHierarchy, ThaumError> {
    let project_path = config.project_path.clone();
    let language = config.language.clone();
    let compression_level = config.compression_level;
    let application = Application::initialize(config, tracer).await?;
    let hierarchy = application
        .compressor
        .process_codebase(
            &project_path,
            language.as_deref(),
            compression_level,
            cancellation,
        )
        .await?;
    Ok(hierarchy)
}

/// Extract the symbol map without compressing anything.
pub async fn crawl_dir(
    project_path: impl AsRef<Path>,
    language: Option<&str>,
    dop: usize,
) -> Result<SymbolMap, ThaumError> {
    let extractor = SymbolExtractor::new(dop);
    Ok(extractor.crawl_dir(project_path, language).await?)
}

/// Nest a flat symbol list by line containment.
pub fn build_hierarchy(flat_symbols: &[CodeSymbol]) -> Vec<CodeSymbol> {
    HierarchyAssembler::build(flat_symbols)
}
