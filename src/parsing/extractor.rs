//! Crawls a project directory and turns it into a `SymbolMap`. The walk is
//! async-facing but the parsing itself is CPU-bound, so the fan-out runs on a
//! dedicated rayon pool sized by the configured degree of parallelism.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::repo::filesystem::FileWalker;
use crate::repo::language::{detect_primary_language, ignore_dirs_for};

use super::languages::TSLanguageParsing;
use super::types::{CodeSymbol, SymbolMap};

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("failed to read the project directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("parser pool could not be built: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),

    #[error("background parse task died: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct SymbolExtractor {
    parsing: TSLanguageParsing,
    dop: usize,
}

impl SymbolExtractor {
    pub fn new(dop: usize) -> Self {
        Self {
            parsing: TSLanguageParsing::init(),
            dop: dop.max(1),
        }
    }

    pub fn language_parsing(&self) -> &TSLanguageParsing {
        &self.parsing
    }

    /// Crawl the project and produce the symbol map. The language is detected
    /// by extension majority when the caller does not pin one. File order is
    /// path-sorted and per-file symbols are start-line-sorted, so repeated
    /// runs over an unchanged tree return identical maps.
    pub async fn crawl_dir(
        &self,
        project_path: impl AsRef<Path>,
        language: Option<&str>,
    ) -> Result<SymbolMap, ExtractorError> {
        let project_path = project_path.as_ref();
        // surfacing a missing root early beats an empty silent crawl
        std::fs::metadata(project_path)?;

        let language = match language {
            Some(language) => Some(language.to_owned()),
            None => {
                let all_files = FileWalker::index_directory(project_path, &[]).file_list;
                detect_primary_language(&all_files, &self.parsing)
            }
        };
        let Some(language) = language else {
            debug!(path = %project_path.display(), "no recognizable source files");
            return Ok(SymbolMap::new());
        };
        let Some(config) = self.parsing.for_lang(&language) else {
            warn!(%language, "no parser binding for language");
            return Ok(SymbolMap::new());
        };
        let extensions = config.file_extensions;

        let files = FileWalker::index_directory(project_path, ignore_dirs_for(&language))
            .with_extensions(extensions);
        self.extract_files(files).await
    }

    /// Parse an explicit file list in parallel, preserving list order in the
    /// resulting map. Used by the crawl and by incremental re-extraction.
    pub async fn extract_files(&self, files: Vec<PathBuf>) -> Result<SymbolMap, ExtractorError> {
        let parsing = self.parsing.clone();
        let dop = self.dop;
        let parsed = tokio::task::spawn_blocking(move || {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(dop).build()?;
            let parsed: Vec<(PathBuf, Vec<CodeSymbol>)> = pool.install(|| {
                files
                    .into_par_iter()
                    .filter_map(|path| {
                        let source = match std::fs::read(&path) {
                            Ok(source) => source,
                            Err(err) => {
                                warn!(path = %path.display(), ?err, "skipping unreadable file");
                                return None;
                            }
                        };
                        let extension = path
                            .extension()
                            .and_then(|extension| extension.to_str())
                            .unwrap_or_default();
                        let file_path = path.to_string_lossy().to_string();
                        let last_modified = std::fs::metadata(&path)
                            .and_then(|meta| meta.modified())
                            .ok()
                            .map(chrono::DateTime::<chrono::Utc>::from);
                        match parsing.parse_file(&source, &file_path, extension) {
                            Ok(symbols) => {
                                let symbols = symbols
                                    .into_iter()
                                    .map(|symbol| match last_modified {
                                        Some(modified) => symbol.with_last_modified(modified),
                                        None => symbol,
                                    })
                                    .collect();
                                Some((path, symbols))
                            }
                            Err(err) => {
                                warn!(path = %file_path, ?err, "skipping unparseable file");
                                None
                            }
                        }
                    })
                    .collect()
            });
            Ok::<_, rayon::ThreadPoolBuildError>(parsed)
        })
        .await??;

        let mut map = SymbolMap::new();
        for (_, symbols) in parsed {
            for symbol in symbols {
                map.add(symbol);
            }
        }
        debug!(symbols = map.len(), "extraction finished");
        Ok(map)
    }

    /// Slice the symbol's source text back out of its file, clamped to the
    /// file extents. Columns count characters, not bytes. I/O failures mean
    /// there is no code to return.
    pub fn get_code(&self, symbol: &CodeSymbol) -> Option<String> {
        let contents = std::fs::read_to_string(symbol.file_path()).ok()?;
        let lines = contents.split('\n').collect::<Vec<_>>();
        let start = symbol.start();
        let end = symbol.end();

        let start_line = (start.line as usize).min(lines.len().saturating_sub(1));
        let end_line = (end.line as usize).min(lines.len().saturating_sub(1));
        if lines.is_empty() || start_line > end_line {
            return Some(String::new());
        }

        let mut sliced = Vec::with_capacity(end_line - start_line + 1);
        for (index, line) in lines[start_line..=end_line].iter().enumerate() {
            let absolute = start_line + index;
            let from = if absolute == start.line as usize {
                start.character as usize
            } else {
                0
            };
            let to = if absolute == end.line as usize {
                end.character as usize
            } else {
                line.chars().count()
            };
            let from = from.min(line.chars().count());
            let to = to.clamp(from, line.chars().count());
            sliced.push(line.chars().skip(from).take(to - from).collect::<String>());
        }
        Some(sliced.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::SymbolExtractor;
    use crate::parsing::types::SymbolKind;
    use std::fs;

    fn fixture_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("alpha.rs"),
            "fn first() {\n    let _ = 1;\n}\n\nfn second() {\n    let _ = 2;\n}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("beta.rs"),
            "struct Config {\n    value: u32,\n}\n\nimpl Config {\n    fn value(&self) -> u32 {\n        self.value\n    }\n}\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn crawl_is_deterministic() {
        let dir = fixture_project();
        let extractor = SymbolExtractor::new(4);
        let first = extractor.crawl_dir(dir.path(), None).await.unwrap();
        let second = extractor.crawl_dir(dir.path(), None).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());

        // file iteration is path sorted
        let files = first.symbols_by_file().keys().cloned().collect::<Vec<_>>();
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);

        // per-file symbols are start-line sorted
        for symbols in first.symbols_by_file().values() {
            assert!(symbols
                .windows(2)
                .all(|w| w[0].start().line <= w[1].start().line));
        }
    }

    #[tokio::test]
    async fn crawl_detects_language_and_kinds() {
        let dir = fixture_project();
        let extractor = SymbolExtractor::new(2);
        let map = extractor.crawl_dir(dir.path(), None).await.unwrap();

        assert_eq!(map.by_name("first").unwrap().kind(), SymbolKind::Function);
        assert_eq!(map.by_name("Config").unwrap().kind(), SymbolKind::Class);
        assert_eq!(map.by_name("value").unwrap().kind(), SymbolKind::Method);
    }

    #[tokio::test]
    async fn get_code_slices_the_exact_range() {
        let dir = fixture_project();
        let extractor = SymbolExtractor::new(2);
        let map = extractor.crawl_dir(dir.path(), Some("Rust")).await.unwrap();
        let symbol = map.by_name("first").unwrap();
        let code = extractor.get_code(symbol).unwrap();
        assert!(code.starts_with("first"));
        assert!(code.contains("let _ = 1;"));
        assert!(!code.contains("second"));
    }

    #[tokio::test]
    async fn missing_file_yields_no_code() {
        let extractor = SymbolExtractor::new(1);
        let symbol = crate::parsing::types::CodeSymbol::new(
            "ghost".to_owned(),
            SymbolKind::Function,
            "/definitely/not/here.rs".to_owned(),
            crate::parsing::types::CodeLocation::new(0, 0),
            crate::parsing::types::CodeLocation::new(1, 0),
        );
        assert!(extractor.get_code(&symbol).is_none());
    }
}
