//! The six-phase compression pipeline. Phases are strictly serialized;
//! inside a phase the symbols fan out over the configured degree of
//! parallelism. Every LLM result lands in the cache before anyone gets to
//! observe it, so re-runs are pure cache traversals.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::application::config::configuration::{ConfigError, Configuration};
use crate::llm::provider::{infer_provider_from_model, LLMProviderAPIKeys};
use crate::llm::types::{LLMClient, LLMClientCompletionRequest, LLMClientError};
use crate::parsing::extractor::{ExtractorError, SymbolExtractor};
use crate::parsing::hierarchy::HierarchyAssembler;
use crate::parsing::types::{CodeSymbol, SymbolHierarchy, SymbolMap};
use crate::prompts::store::{PromptStore, PromptStoreError, PromptSymbolType};

use super::cache::{key_fingerprint, symbol_fingerprint, CacheMetadata, CompressionCache};
use super::tracer::{TraceEvent, TraceSink};
use super::types::{CompressionLevel, OptimizationContext};

const SYMBOL_TEMPERATURE: f64 = 0.3;
const SYMBOL_MAX_TOKENS: u32 = 1024;
const KEY_TEMPERATURE: f64 = 0.2;
const KEY_MAX_TOKENS: u32 = 512;
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("llm transport failure: {0}")]
    Llm(#[from] LLMClientError),

    #[error("prompt failure: {0}")]
    Prompt(#[from] PromptStoreError),

    #[error("extraction failure: {0}")]
    Extraction(#[from] ExtractorError),

    #[error("pipeline was cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

enum InflightClaim {
    Lead(watch::Sender<bool>),
    Wait(watch::Receiver<bool>),
}

/// Keeps the in-flight table honest even when the leader's future is dropped
/// mid-call: the entry goes away and the waiters get woken either way.
struct InflightGuard<'a> {
    inflight: &'a Mutex<HashMap<String, watch::Receiver<bool>>>,
    fingerprint: String,
    notify: Option<watch::Sender<bool>>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight.lock().unwrap().remove(&self.fingerprint);
        if let Some(notify) = self.notify.take() {
            let _ = notify.send(true);
        }
    }
}

pub struct Compressor {
    model: String,
    api_keys: LLMProviderAPIKeys,
    llm_client: Arc<dyn LLMClient + Send + Sync>,
    cache: Arc<CompressionCache>,
    prompt_store: Arc<PromptStore>,
    extractor: Arc<SymbolExtractor>,
    tracer: Arc<dyn TraceSink>,
    dop: usize,
    /// fingerprint → progress channel of whoever is computing it right now
    inflight: Mutex<HashMap<String, watch::Receiver<bool>>>,
}

impl Compressor {
    pub fn new(
        configuration: &Configuration,
        llm_client: Arc<dyn LLMClient + Send + Sync>,
        cache: Arc<CompressionCache>,
        tracer: Arc<dyn TraceSink>,
    ) -> Result<Self, ConfigError> {
        let model = configuration.model()?;
        Ok(Self {
            model,
            api_keys: configuration.api_keys(),
            llm_client,
            cache,
            prompt_store: Arc::new(PromptStore::new(configuration.prompt_overrides().clone())),
            extractor: Arc::new(SymbolExtractor::new(configuration.dop())),
            tracer,
            dop: configuration.dop(),
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn extractor(&self) -> &SymbolExtractor {
        &self.extractor
    }

    /// Compress one symbol. Cache first, then at most one in-flight LLM call
    /// per fingerprint; everyone else waits on the leader and re-reads the
    /// cache once it lands.
    pub async fn optimize_symbol(
        &self,
        symbol: &CodeSymbol,
        context: &OptimizationContext,
        source_code: &str,
    ) -> Result<String, CompressionError> {
        self.optimize_symbol_cancellable(symbol, context, source_code, &CancellationToken::new())
            .await
    }

    async fn optimize_symbol_cancellable(
        &self,
        symbol: &CodeSymbol,
        context: &OptimizationContext,
        source_code: &str,
        cancellation: &CancellationToken,
    ) -> Result<String, CompressionError> {
        let fingerprint = symbol_fingerprint(
            symbol.name(),
            symbol.file_path(),
            symbol.start().line,
            context.level(),
            context.available_keys(),
        );
        loop {
            if let Some(cached) = self.cache.try_get(&fingerprint).await {
                self.tracer.send(TraceEvent::CacheHit {
                    fingerprint: fingerprint.clone(),
                });
                return Ok(cached);
            }

            let claim = {
                let mut inflight = self.inflight.lock().unwrap();
                match inflight.get(&fingerprint) {
                    Some(receiver) => InflightClaim::Wait(receiver.clone()),
                    None => {
                        let (sender, receiver) = watch::channel(false);
                        inflight.insert(fingerprint.clone(), receiver);
                        InflightClaim::Lead(sender)
                    }
                }
            };
            match claim {
                InflightClaim::Wait(mut receiver) => {
                    // the leader finished or died; either way the cache is
                    // the source of truth, loop back to it
                    let _ = receiver.changed().await;
                }
                InflightClaim::Lead(sender) => {
                    let _guard = InflightGuard {
                        inflight: &self.inflight,
                        fingerprint: fingerprint.clone(),
                        notify: Some(sender),
                    };
                    return self
                        .compress_symbol_uncached(symbol, context, source_code, &fingerprint, cancellation)
                        .await;
                }
            }
        }
    }

    async fn compress_symbol_uncached(
        &self,
        symbol: &CodeSymbol,
        context: &OptimizationContext,
        source_code: &str,
        fingerprint: &str,
        cancellation: &CancellationToken,
    ) -> Result<String, CompressionError> {
        if cancellation.is_cancelled() {
            return Err(CompressionError::Cancelled);
        }
        let symbol_type = if symbol.kind().is_class_like() {
            PromptSymbolType::Class
        } else {
            PromptSymbolType::Function
        };
        let prompt_name = self
            .prompt_store
            .resolve_name(context.compression_level(), symbol_type);
        let mut parameters = HashMap::new();
        parameters.insert("sourceCode".to_owned(), source_code.to_owned());
        parameters.insert("symbolName".to_owned(), symbol.name().to_owned());
        parameters.insert("availableKeys".to_owned(), context.render_available_keys());
        let prompt = self.prompt_store.format(&prompt_name, &parameters)?;

        let request = LLMClientCompletionRequest::new(
            prompt,
            self.model.clone(),
            SYMBOL_TEMPERATURE,
            SYMBOL_MAX_TOKENS,
        );
        let answer = self
            .stream_to_completion(symbol.name(), request, cancellation)
            .await?;
        let answer = answer.trim().to_owned();
        self.write_through(fingerprint, &answer, &prompt_name).await;
        Ok(answer)
    }

    /// Distil the shared pattern out of a batch of summaries. The
    /// fingerprint covers the concatenation, so the same summaries in a
    /// different order are a different key.
    pub async fn extract_common_key(
        &self,
        summaries: &[String],
        level: u8,
        compression_level: CompressionLevel,
    ) -> Result<String, CompressionError> {
        self.extract_common_key_cancellable(summaries, level, compression_level, &CancellationToken::new())
            .await
    }

    async fn extract_common_key_cancellable(
        &self,
        summaries: &[String],
        level: u8,
        compression_level: CompressionLevel,
        cancellation: &CancellationToken,
    ) -> Result<String, CompressionError> {
        let fingerprint = key_fingerprint(level, summaries);
        if let Some(cached) = self.cache.try_get(&fingerprint).await {
            self.tracer.send(TraceEvent::CacheHit {
                fingerprint: fingerprint.clone(),
            });
            self.tracer.send(TraceEvent::KeyExtracted { level });
            return Ok(cached);
        }
        if cancellation.is_cancelled() {
            return Err(CompressionError::Cancelled);
        }

        let prompt_name = self
            .prompt_store
            .resolve_name(compression_level, PromptSymbolType::Key);
        let numbered = summaries
            .iter()
            .enumerate()
            .map(|(index, summary)| format!("{}. {}", index + 1, summary))
            .collect::<Vec<_>>()
            .join("\n");
        let mut parameters = HashMap::new();
        parameters.insert("summaries".to_owned(), numbered);
        parameters.insert("level".to_owned(), level.to_string());
        let prompt = self.prompt_store.format(&prompt_name, &parameters)?;

        let request = LLMClientCompletionRequest::new(
            prompt,
            self.model.clone(),
            KEY_TEMPERATURE,
            KEY_MAX_TOKENS,
        );
        let answer = self
            .stream_to_completion(&format!("key_L{level}"), request, cancellation)
            .await?;
        let answer = answer.trim().to_owned();
        self.write_through(&fingerprint, &answer, &prompt_name).await;
        self.tracer.send(TraceEvent::KeyExtracted { level });
        Ok(answer)
    }

    /// Drive the transport stream to the end, forwarding every delta to the
    /// tracer. Cancellation drops the transport future, which tears the
    /// stream down with it.
    async fn stream_to_completion(
        &self,
        symbol_name: &str,
        request: LLMClientCompletionRequest,
        cancellation: &CancellationToken,
    ) -> Result<String, CompressionError> {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let client = self.llm_client.clone();
        let api_keys = self.api_keys.clone();
        let handle =
            tokio::spawn(async move { client.stream_completion(api_keys, request, sender).await });
        loop {
            tokio::select! {
                update = receiver.recv() => match update {
                    Some(update) => {
                        if let Some(delta) = update.delta() {
                            self.tracer.send(TraceEvent::SymbolStream {
                                symbol: symbol_name.to_owned(),
                                delta: delta.to_owned(),
                            });
                        }
                    }
                    None => break,
                },
                _ = cancellation.cancelled() => {
                    handle.abort();
                    return Err(CompressionError::Cancelled);
                }
            }
        }
        Ok(handle.await??)
    }

    /// Cache writes are best effort: a failure costs a recompute on the next
    /// run, never the pipeline.
    async fn write_through(&self, fingerprint: &str, artifact: &str, prompt_name: &str) {
        let metadata = CacheMetadata {
            prompt_name: prompt_name.to_owned(),
            prompt_content_hash: self
                .prompt_store
                .content_hash(prompt_name)
                .unwrap_or_default(),
            model: self.model.clone(),
            // legacy rows carry the substring-derived provider string, new
            // rows keep the same vocabulary
            provider: infer_provider_from_model(&self.model).to_owned(),
        };
        if let Err(err) = self
            .cache
            .set(fingerprint, artifact, CACHE_TTL, metadata)
            .await
        {
            warn!(?err, %fingerprint, "cache write failed, continuing without it");
        }
    }

    /// Crawl the project and run the six phases over everything we found.
    pub async fn process_codebase(
        &self,
        project_path: impl AsRef<Path>,
        language: Option<&str>,
        compression_level: CompressionLevel,
        cancellation: CancellationToken,
    ) -> Result<SymbolHierarchy, CompressionError> {
        let project_path = project_path.as_ref();
        let map = self.extractor.crawl_dir(project_path, language).await?;
        self.process_symbol_map(
            &project_path.to_string_lossy(),
            &map,
            compression_level,
            &cancellation,
        )
        .await
    }

    /// The pipeline proper, over an already-extracted map:
    ///
    /// 1. summarize every function,      keys []
    /// 2. distil K1 from those summaries
    /// 3. re-summarize every function,   keys [K1]
    /// 4. summarize every class,         keys [K1]
    /// 5. distil K2 from those summaries
    /// 6. re-summarize everything,       keys [K1, K2]
    ///
    /// Phase 2 is skipped when there are no functions to distil from; phase
    /// 5 only when the project has no symbols at all, which is why an empty
    /// project produces no LLM traffic whatsoever.
    pub(crate) async fn process_symbol_map(
        &self,
        project_path: &str,
        map: &SymbolMap,
        compression_level: CompressionLevel,
        cancellation: &CancellationToken,
    ) -> Result<SymbolHierarchy, CompressionError> {
        let functions = map
            .all_symbols()
            .iter()
            .filter(|symbol| symbol.kind().is_function_like())
            .collect::<Vec<_>>();
        let classes = map
            .all_symbols()
            .iter()
            .filter(|symbol| symbol.kind().is_class_like())
            .collect::<Vec<_>>();
        let mut extracted_keys: BTreeMap<String, String> = BTreeMap::new();

        let function_items = functions
            .iter()
            .map(|symbol| (*symbol, 1u8))
            .collect::<Vec<_>>();
        let class_items = classes
            .iter()
            .map(|symbol| (*symbol, 2u8))
            .collect::<Vec<_>>();

        let summaries_level_1 = self
            .run_phase(1, &function_items, &[], compression_level, cancellation)
            .await?;

        self.tracer.send(TraceEvent::PhaseBegin {
            phase: 2,
            total: usize::from(!summaries_level_1.is_empty()),
        });
        if !summaries_level_1.is_empty() {
            let k1 = self
                .extract_common_key_cancellable(&summaries_level_1, 1, compression_level, cancellation)
                .await?;
            extracted_keys.insert("K1".to_owned(), k1);
        }
        self.tracer.send(TraceEvent::PhaseEnd {
            phase: 2,
            completed: extracted_keys.len(),
        });

        let keys_after_k1 = extracted_keys.values().cloned().collect::<Vec<_>>();
        // phase 3 populates the cache with K1-aware function summaries, the
        // returned values are deliberately unused
        let _ = self
            .run_phase(3, &function_items, &keys_after_k1, compression_level, cancellation)
            .await?;

        let summaries_level_2 = self
            .run_phase(4, &class_items, &keys_after_k1, compression_level, cancellation)
            .await?;

        // K2 distils whatever the class pass produced; only a project with
        // no symbols at all skips it, an all-function project still gets a
        // (degenerate) class-scope key
        let has_symbols = !function_items.is_empty() || !class_items.is_empty();
        self.tracer.send(TraceEvent::PhaseBegin {
            phase: 5,
            total: usize::from(has_symbols),
        });
        if has_symbols {
            let k2 = self
                .extract_common_key_cancellable(&summaries_level_2, 2, compression_level, cancellation)
                .await?;
            extracted_keys.insert("K2".to_owned(), k2);
        }
        self.tracer.send(TraceEvent::PhaseEnd {
            phase: 5,
            completed: extracted_keys.len().saturating_sub(keys_after_k1.len()),
        });

        let all_keys = extracted_keys.values().cloned().collect::<Vec<_>>();
        let mut final_items = function_items.clone();
        final_items.extend(class_items.iter().copied());
        let _ = self
            .run_phase(6, &final_items, &all_keys, compression_level, cancellation)
            .await?;

        let root_symbols = HierarchyAssembler::build(map.all_symbols());
        self.tracer.send(TraceEvent::Complete { symbols: map.len() });
        Ok(SymbolHierarchy::new(
            project_path.to_owned(),
            root_symbols,
            extracted_keys,
            Utc::now(),
        ))
    }

    /// One fan-out phase over `(symbol, level)` items. Completion order is
    /// whatever the scheduler decides, the returned summaries are in item
    /// order regardless. The first failure aborts the phase; dropping the
    /// stream drops the in-flight calls with it.
    async fn run_phase(
        &self,
        phase: u8,
        items: &[(&CodeSymbol, u8)],
        keys: &[String],
        compression_level: CompressionLevel,
        cancellation: &CancellationToken,
    ) -> Result<Vec<String>, CompressionError> {
        self.tracer.send(TraceEvent::PhaseBegin {
            phase,
            total: items.len(),
        });
        if items.is_empty() {
            self.tracer.send(TraceEvent::PhaseEnd {
                phase,
                completed: 0,
            });
            return Ok(Vec::new());
        }

        let mut summaries: Vec<Option<String>> = vec![None; items.len()];
        let mut fan_out = futures::stream::iter(items.iter().enumerate().map(|(index, item)| {
            let (symbol, level) = *item;
            let context = OptimizationContext::new(level, keys.to_vec(), compression_level);
            async move {
                // unreadable source degrades to an empty string, the model
                // still gets to judge the symbol
                let source_code = self.extractor.get_code(symbol).unwrap_or_default();
                let summary = self
                    .optimize_symbol_cancellable(symbol, &context, &source_code, cancellation)
                    .await;
                (index, summary)
            }
        }))
        .buffer_unordered(self.dop);

        while let Some((index, summary)) = fan_out.next().await {
            summaries[index] = Some(summary?);
        }
        drop(fan_out);

        self.tracer.send(TraceEvent::PhaseEnd {
            phase,
            completed: summaries.len(),
        });
        Ok(summaries
            .into_iter()
            .map(|summary| summary.unwrap_or_default())
            .collect())
    }

    /// Incremental path: throw away every cached artifact touching the
    /// changed files, re-extract just those files and push them back through
    /// the pipeline, then splice the rebuilt roots into the existing
    /// hierarchy.
    pub async fn update_hierarchy(
        &self,
        existing: &SymbolHierarchy,
        changes: &[PathBuf],
        compression_level: CompressionLevel,
        cancellation: CancellationToken,
    ) -> Result<SymbolHierarchy, CompressionError> {
        for change in changes {
            let pattern = format!("optimization_*_{}_*", change.display());
            if let Err(err) = self.cache.invalidate_pattern(&pattern).await {
                warn!(?err, change = %change.display(), "cache invalidation failed");
            }
        }

        let surviving = changes
            .iter()
            .filter(|path| path.is_file())
            .cloned()
            .collect::<Vec<_>>();
        let map = self.extractor.extract_files(surviving).await?;
        let rebuilt = self
            .process_symbol_map(existing.project_path(), &map, compression_level, &cancellation)
            .await?;

        let changed_paths: HashSet<String> = changes
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect();
        let mut root_symbols = existing
            .root_symbols()
            .iter()
            .filter(|symbol| !changed_paths.contains(symbol.file_path()))
            .cloned()
            .collect::<Vec<_>>();
        root_symbols.extend(rebuilt.root_symbols().iter().cloned());
        root_symbols.sort_by(|a, b| {
            (a.file_path(), a.start().line).cmp(&(b.file_path(), b.start().line))
        });

        let mut extracted_keys = existing.extracted_keys().clone();
        extracted_keys.extend(rebuilt.extracted_keys().clone());
        Ok(SymbolHierarchy::new(
            existing.project_path().to_owned(),
            root_symbols,
            extracted_keys,
            Utc::now(),
        ))
    }

    /// Auxiliary: ask the model to sharpen a prompt against a set of example
    /// inputs. Does not touch the cache.
    pub async fn get_optimized_prompt(
        &self,
        base_prompt: &str,
        examples: &[String],
        task: &str,
    ) -> Result<String, CompressionError> {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Improve the prompt below for a code compression engine. Keep its intent, sharpen its instructions."
        );
        let _ = writeln!(prompt, "\nBase prompt:\n{base_prompt}");
        if !examples.is_empty() {
            let _ = writeln!(prompt, "\nExamples of inputs it has to handle:");
            for (index, example) in examples.iter().enumerate() {
                let _ = writeln!(prompt, "{}. {}", index + 1, example);
            }
        }
        let _ = writeln!(prompt, "\nTask: {task}");
        let _ = writeln!(prompt, "Respond with the improved prompt only.");

        let request = LLMClientCompletionRequest::new(
            prompt,
            self.model.clone(),
            SYMBOL_TEMPERATURE,
            SYMBOL_MAX_TOKENS,
        );
        let answer = self
            .llm_client
            .completion(self.api_keys.clone(), request)
            .await?;
        Ok(answer.trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use clap::Parser;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio_util::sync::CancellationToken;

    use super::{CompressionError, Compressor};
    use crate::application::config::configuration::Configuration;
    use crate::compression::cache::{symbol_fingerprint, CacheMetadata, CompressionCache};
    use crate::compression::tracer::NullTraceSink;
    use crate::compression::types::{CompressionLevel, OptimizationContext};
    use crate::db::sqlite::init_memory_db;
    use crate::llm::provider::{LLMProvider, LLMProviderAPIKeys};
    use crate::llm::types::{
        LLMClient, LLMClientCompletionRequest, LLMClientCompletionResponse, LLMClientError,
    };
    use crate::parsing::types::{CodeLocation, CodeSymbol, SymbolKind, SymbolMap};

    /// Deterministic transport double. Classifies each prompt by the
    /// template markers, answers `S(<name>)` for symbols and `K1`/`K2` for
    /// key extraction, and keeps begin/end journals so the tests can check
    /// phase barriers.
    struct StubLLMClient {
        function_calls: AtomicUsize,
        class_calls: AtomicUsize,
        key_calls: AtomicUsize,
        delay: Duration,
        events: Mutex<Vec<String>>,
    }

    impl StubLLMClient {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::from_millis(0))
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                function_calls: AtomicUsize::new(0),
                class_calls: AtomicUsize::new(0),
                key_calls: AtomicUsize::new(0),
                delay,
                events: Mutex::new(Vec::new()),
            })
        }

        fn total_calls(&self) -> usize {
            self.function_calls.load(Ordering::SeqCst)
                + self.class_calls.load(Ordering::SeqCst)
                + self.key_calls.load(Ordering::SeqCst)
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn classify(&self, prompt: &str) -> (String, String) {
            if prompt.contains("Summaries:") {
                self.key_calls.fetch_add(1, Ordering::SeqCst);
                let level = if prompt.contains("at level 1") { 1 } else { 2 };
                (format!("key:{level}"), format!("K{level}"))
            } else if let Some(name) = find_line(prompt, "Class: ") {
                self.class_calls.fetch_add(1, Ordering::SeqCst);
                (
                    format!("class:{name}:k{}", keyed(prompt)),
                    format!("S({name})"),
                )
            } else {
                let name =
                    find_line(prompt, "Function: ").unwrap_or_else(|| "unknown".to_owned());
                self.function_calls.fetch_add(1, Ordering::SeqCst);
                (
                    format!("function:{name}:k{}", keyed(prompt)),
                    format!("S({name})"),
                )
            }
        }
    }

    fn find_line(prompt: &str, prefix: &str) -> Option<String> {
        prompt
            .lines()
            .find_map(|line| line.strip_prefix(prefix))
            .map(|rest| rest.trim().to_owned())
    }

    /// How many extracted keys the rendered prompt carries.
    fn keyed(prompt: &str) -> usize {
        if prompt.contains("- K1\n- K2") {
            2
        } else if prompt.contains("- K1") {
            1
        } else {
            0
        }
    }

    #[async_trait]
    impl LLMClient for StubLLMClient {
        fn client(&self) -> &LLMProvider {
            &LLMProvider::OpenAI
        }

        async fn completion(
            &self,
            api_key: LLMProviderAPIKeys,
            request: LLMClientCompletionRequest,
        ) -> Result<String, LLMClientError> {
            let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
            self.stream_completion(api_key, request, sender).await
        }

        async fn stream_completion(
            &self,
            _api_key: LLMProviderAPIKeys,
            request: LLMClientCompletionRequest,
            sender: UnboundedSender<LLMClientCompletionResponse>,
        ) -> Result<String, LLMClientError> {
            let (label, answer) = self.classify(request.prompt());
            self.events.lock().unwrap().push(format!("begin {label}"));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let _ = sender.send(LLMClientCompletionResponse::new(
                answer.clone(),
                Some(answer.clone()),
                request.model().to_owned(),
            ));
            self.events.lock().unwrap().push(format!("end {label}"));
            Ok(answer)
        }
    }

    async fn build_compressor(
        stub: Arc<StubLLMClient>,
    ) -> (Compressor, Arc<CompressionCache>) {
        let config =
            Configuration::parse_from(["thaum", "/tmp/project", "--model", "stub-model"]);
        let cache = Arc::new(CompressionCache::new(init_memory_db().await.unwrap()));
        let compressor =
            Compressor::new(&config, stub, cache.clone(), Arc::new(NullTraceSink)).unwrap();
        (compressor, cache)
    }

    fn symbol(name: &str, kind: SymbolKind, file: &str, start: u32, end: u32) -> CodeSymbol {
        CodeSymbol::new(
            name.to_owned(),
            kind,
            file.to_owned(),
            CodeLocation::new(start, 0),
            CodeLocation::new(end, 0),
        )
    }

    fn metadata() -> CacheMetadata {
        CacheMetadata {
            prompt_name: "compress_function_v2".to_owned(),
            prompt_content_hash: String::new(),
            model: "stub-model".to_owned(),
            provider: "unknown".to_owned(),
        }
    }

    #[tokio::test]
    async fn empty_project_makes_no_llm_calls() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let map = SymbolMap::new();
        let hierarchy = compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(hierarchy.root_symbols().is_empty());
        assert!(hierarchy.extracted_keys().is_empty());
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn empty_directory_end_to_end() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let hierarchy = compressor
            .process_codebase(
                dir.path(),
                None,
                CompressionLevel::Compress,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(hierarchy.root_symbols().is_empty());
        assert!(hierarchy.extracted_keys().is_empty());
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn single_function_issues_three_symbol_and_two_key_calls() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let mut map = SymbolMap::new();
        // the file never exists on disk, so the source degrades to an empty
        // string and the model is still consulted
        map.add(symbol("foo", SymbolKind::Function, "/proj/a.py", 0, 2));

        let hierarchy = compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(stub.function_calls.load(Ordering::SeqCst), 3);
        assert_eq!(stub.class_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stub.key_calls.load(Ordering::SeqCst), 2);
        assert_eq!(hierarchy.root_symbols().len(), 1);
        assert_eq!(
            hierarchy.extracted_keys().get("K1").map(String::as_str),
            Some("K1")
        );
        assert_eq!(
            hierarchy.extracted_keys().get("K2").map(String::as_str),
            Some("K2")
        );
    }

    #[tokio::test]
    async fn class_with_two_methods_counts_and_nesting() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let mut map = SymbolMap::new();
        map.add(symbol("C", SymbolKind::Class, "/proj/c.cs", 0, 19));
        map.add(symbol("m1", SymbolKind::Method, "/proj/c.cs", 2, 5));
        map.add(symbol("m2", SymbolKind::Method, "/proj/c.cs", 8, 12));

        let hierarchy = compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // two methods over phases 1, 3 and 6; one class over phases 4 and 6
        assert_eq!(stub.function_calls.load(Ordering::SeqCst), 6);
        assert_eq!(stub.class_calls.load(Ordering::SeqCst), 2);
        assert_eq!(stub.key_calls.load(Ordering::SeqCst), 2);

        assert_eq!(hierarchy.root_symbols().len(), 1);
        let class = &hierarchy.root_symbols()[0];
        assert_eq!(class.name(), "C");
        let children = class
            .children()
            .iter()
            .map(|child| child.name().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(children, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn second_run_is_served_entirely_from_cache() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let mut map = SymbolMap::new();
        map.add(symbol("foo", SymbolKind::Function, "/proj/a.py", 0, 2));
        map.add(symbol("C", SymbolKind::Class, "/proj/b.py", 0, 10));

        let first = compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let calls_after_first = stub.total_calls();

        let second = compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(stub.total_calls(), calls_after_first);
        assert_eq!(first.root_symbols(), second.root_symbols());
        assert_eq!(first.extracted_keys(), second.extracted_keys());
    }

    #[tokio::test]
    async fn prepopulated_phase_one_entries_skip_phase_one_only() {
        let stub = StubLLMClient::new();
        let (compressor, cache) = build_compressor(stub.clone()).await;
        let mut map = SymbolMap::new();
        map.add(symbol("foo", SymbolKind::Function, "/proj/a.py", 0, 2));

        // phase-1 fingerprint: level 1, no keys
        let phase_one = symbol_fingerprint("foo", "/proj/a.py", 0, 1, &[]);
        cache
            .set(&phase_one, "S(foo)", Duration::from_secs(600), metadata())
            .await
            .unwrap();

        compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // phases 3 and 6 still had to run, phase 1 was a pure hit
        assert_eq!(stub.function_calls.load(Ordering::SeqCst), 2);
        assert_eq!(stub.key_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_recomputes_only_matching_symbols() {
        let stub = StubLLMClient::new();
        let (compressor, cache) = build_compressor(stub.clone()).await;
        let mut map = SymbolMap::new();
        map.add(symbol("foo", SymbolKind::Function, "/proj/a.py", 0, 2));
        map.add(symbol("bar", SymbolKind::Function, "/proj/a.py", 5, 7));

        compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        // two functions across phases 1, 3, 6 plus K1 and the degenerate K2
        assert_eq!(stub.function_calls.load(Ordering::SeqCst), 6);
        assert_eq!(stub.key_calls.load(Ordering::SeqCst), 2);

        cache.invalidate_pattern("optimization_foo_*").await.unwrap();

        compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // foo re-ran its three phases, bar stayed cached, and both keys were
        // already cached because the summaries came back unchanged
        assert_eq!(stub.function_calls.load(Ordering::SeqCst), 9);
        assert_eq!(stub.key_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn phases_are_strictly_ordered() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let mut map = SymbolMap::new();
        map.add(symbol("f1", SymbolKind::Function, "/proj/a.py", 0, 2));
        map.add(symbol("f2", SymbolKind::Function, "/proj/a.py", 4, 6));
        map.add(symbol("C", SymbolKind::Class, "/proj/a.py", 8, 20));

        compressor
            .process_symbol_map(
                "/proj",
                &map,
                CompressionLevel::Compress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = stub.events();
        let last = |needle: &str| {
            events
                .iter()
                .rposition(|event| event.starts_with("end") && event.contains(needle))
                .unwrap()
        };
        let first = |needle: &str| {
            events
                .iter()
                .position(|event| event.starts_with("begin") && event.contains(needle))
                .unwrap()
        };

        // phase 1 drains before K1 extraction, K1 before any phase-3 call,
        // phase 3 before the classes, K2 before the final sweep
        assert!(last(":k0") < first("key:1"));
        assert!(last("key:1") < first("function:f1:k1"));
        assert!(last("key:1") < first("function:f2:k1"));
        assert!(last("function:f1:k1") < first("class:C:k1"));
        assert!(last("function:f2:k1") < first("class:C:k1"));
        assert!(last("key:2") < first(":k2"));
    }

    #[tokio::test]
    async fn optimize_symbol_is_idempotent_per_context() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let target = symbol("foo", SymbolKind::Function, "/proj/a.py", 0, 2);
        let context = OptimizationContext::new(1, vec![], CompressionLevel::Compress);

        let first = compressor
            .optimize_symbol(&target, &context, "def foo(): pass")
            .await
            .unwrap();
        assert_eq!(stub.function_calls.load(Ordering::SeqCst), 1);

        let second = compressor
            .optimize_symbol(&target, &context, "def foo(): pass")
            .await
            .unwrap();
        assert_eq!(first, second);
        // second call was a pure cache read
        assert_eq!(stub.function_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_fingerprints_share_one_flight() {
        let stub = StubLLMClient::with_delay(Duration::from_millis(25));
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let target = symbol("foo", SymbolKind::Function, "/proj/a.py", 0, 2);
        let context = OptimizationContext::new(1, vec![], CompressionLevel::Compress);

        let (first, second) = tokio::join!(
            compressor.optimize_symbol(&target, &context, "def foo(): pass"),
            compressor.optimize_symbol(&target, &context, "def foo(): pass"),
        );
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(stub.function_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_pipeline_surfaces_the_cancellation() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let mut map = SymbolMap::new();
        map.add(symbol("foo", SymbolKind::Function, "/proj/a.py", 0, 2));

        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let result = compressor
            .process_symbol_map("/proj", &map, CompressionLevel::Compress, &cancellation)
            .await;
        assert!(matches!(result, Err(CompressionError::Cancelled)));
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn extract_common_key_numbers_the_summaries() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let summaries = vec!["alpha".to_owned(), "beta".to_owned()];
        let key = compressor
            .extract_common_key(&summaries, 1, CompressionLevel::Compress)
            .await
            .unwrap();
        assert_eq!(key, "K1");
        assert_eq!(stub.key_calls.load(Ordering::SeqCst), 1);

        // same summaries, same fingerprint, no second call
        let again = compressor
            .extract_common_key(&summaries, 1, CompressionLevel::Compress)
            .await
            .unwrap();
        assert_eq!(again, "K1");
        assert_eq!(stub.key_calls.load(Ordering::SeqCst), 1);

        // reordering the summaries changes the fingerprint and recomputes
        let reordered = vec!["beta".to_owned(), "alpha".to_owned()];
        compressor
            .extract_common_key(&reordered, 1, CompressionLevel::Compress)
            .await
            .unwrap();
        assert_eq!(stub.key_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn update_hierarchy_reprocesses_the_changed_file() {
        let stub = StubLLMClient::new();
        let (compressor, cache) = build_compressor(stub.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.rs");
        std::fs::write(&file, "fn foo() {\n    let _ = 1;\n}\n").unwrap();
        let file = std::fs::canonicalize(&file).unwrap();

        let hierarchy = compressor
            .process_codebase(
                dir.path(),
                Some("Rust"),
                CompressionLevel::Compress,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(hierarchy.root_symbols().len(), 1);
        let size_before = cache.size().await;
        assert!(size_before > 0);

        std::fs::write(
            &file,
            "fn foo() {\n    let _ = 1;\n}\n\nfn bar() {\n    let _ = 2;\n}\n",
        )
        .unwrap();
        let updated = compressor
            .update_hierarchy(
                &hierarchy,
                &[file.clone()],
                CompressionLevel::Compress,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let names = updated
            .root_symbols()
            .iter()
            .map(|root| root.name().to_owned())
            .collect::<Vec<_>>();
        assert!(names.contains(&"foo".to_owned()));
        assert!(names.contains(&"bar".to_owned()));
        assert!(updated.extracted_keys().contains_key("K1"));
    }

    #[tokio::test]
    async fn get_optimized_prompt_goes_through_the_transport() {
        let stub = StubLLMClient::new();
        let (compressor, _cache) = build_compressor(stub.clone()).await;
        let improved = compressor
            .get_optimized_prompt(
                "Summarize the code.",
                &["fn main() {}".to_owned()],
                "make it terser",
            )
            .await
            .unwrap();
        assert_eq!(improved, "S(unknown)");
        assert_eq!(stub.total_calls(), 1);
    }
}
