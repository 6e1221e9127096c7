//! Core symbol types shared between the extractor, the compressor and the
//! hierarchy assembler. Symbols are immutable once produced by the extractor,
//! parents are computed after the fact so the tree never needs back-references.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// A position inside a decoded file. Lines and columns are 0-based and the
/// column is a character offset into the line, not a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CodeLocation {
    pub line: u32,
    pub character: u32,
}

impl CodeLocation {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SymbolKind {
    Namespace,
    Class,
    Interface,
    Enum,
    EnumMember,
    Constructor,
    Method,
    Function,
    Property,
    Field,
    Variable,
    Parameter,
    Module,
}

impl SymbolKind {
    /// Maps the capture-name prefix from a language query to a kind. The
    /// prefixes are matched as whole segments so `enum_member` can never be
    /// shadowed by `enum`.
    pub fn from_capture_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "namespace" => Some(Self::Namespace),
            "class" => Some(Self::Class),
            "interface" => Some(Self::Interface),
            "enum" => Some(Self::Enum),
            "enum_member" => Some(Self::EnumMember),
            "constructor" => Some(Self::Constructor),
            "method" => Some(Self::Method),
            "function" => Some(Self::Function),
            "property" => Some(Self::Property),
            "field" => Some(Self::Field),
            "variable" => Some(Self::Variable),
            "parameter" => Some(Self::Parameter),
            "module" => Some(Self::Module),
            _ => None,
        }
    }

    pub fn is_function_like(&self) -> bool {
        matches!(self, Self::Function | Self::Method)
    }

    pub fn is_class_like(&self) -> bool {
        matches!(self, Self::Class)
    }
}

/// A named, located code entity extracted from source. Immutable after
/// construction; `children` is only populated by the hierarchy assembler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeSymbol {
    name: String,
    kind: SymbolKind,
    file_path: String,
    start: CodeLocation,
    end: CodeLocation,
    children: Vec<CodeSymbol>,
    dependencies: BTreeSet<String>,
    last_modified: Option<DateTime<Utc>>,
}

impl CodeSymbol {
    pub fn new(
        name: String,
        kind: SymbolKind,
        file_path: String,
        start: CodeLocation,
        end: CodeLocation,
    ) -> Self {
        debug_assert!(!name.is_empty());
        debug_assert!((start.line, start.character) <= (end.line, end.character));
        Self {
            name,
            kind,
            file_path,
            start,
            end,
            children: Vec::new(),
            dependencies: BTreeSet::new(),
            last_modified: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: BTreeSet<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Used by the hierarchy assembler when it rebuilds the nesting; the
    /// extractor always produces symbols with no children.
    pub fn with_children(mut self, children: Vec<CodeSymbol>) -> Self {
        self.children = children;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn start(&self) -> CodeLocation {
        self.start
    }

    pub fn end(&self) -> CodeLocation {
        self.end
    }

    pub fn children(&self) -> &[CodeSymbol] {
        &self.children
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Number of lines the symbol spans, used to pick the smallest containing
    /// parent when nesting.
    pub fn line_span(&self) -> u32 {
        self.end.line - self.start.line
    }

    pub fn contains_lines(&self, other: &CodeSymbol) -> bool {
        self.start.line <= other.start.line && self.end.line >= other.end.line
    }
}

/// The indexed, file-partitioned view over everything the extractor found.
/// The three views stay consistent after every `add` and `clear`: files
/// iterate path-sorted, symbols within a file iterate start-line-sorted, and
/// `all_symbols` preserves discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolMap {
    symbols_by_file: BTreeMap<String, Vec<CodeSymbol>>,
    symbols_by_name: HashMap<String, CodeSymbol>,
    all_symbols: Vec<CodeSymbol>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: CodeSymbol) {
        let per_file = self
            .symbols_by_file
            .entry(symbol.file_path().to_owned())
            .or_default();
        // keep the per-file view sorted by start line; equal lines keep
        // insertion order
        let position = per_file
            .partition_point(|existing| existing.start().line <= symbol.start().line);
        per_file.insert(position, symbol.clone());

        // most-recently-added wins on name collisions, which we log so the
        // tie-break is at least visible
        if self.symbols_by_name.contains_key(symbol.name()) {
            warn!(name = symbol.name(), file = symbol.file_path(), "duplicate symbol name, keeping the newest");
        }
        self.symbols_by_name
            .insert(symbol.name().to_owned(), symbol.clone());

        self.all_symbols.push(symbol);
    }

    pub fn clear(&mut self) {
        self.symbols_by_file.clear();
        self.symbols_by_name.clear();
        self.all_symbols.clear();
    }

    pub fn symbols_by_file(&self) -> &BTreeMap<String, Vec<CodeSymbol>> {
        &self.symbols_by_file
    }

    pub fn for_file(&self, file_path: &str) -> Option<&[CodeSymbol]> {
        self.symbols_by_file.get(file_path).map(|v| v.as_slice())
    }

    pub fn by_name(&self, name: &str) -> Option<&CodeSymbol> {
        self.symbols_by_name.get(name)
    }

    pub fn all_symbols(&self) -> &[CodeSymbol] {
        &self.all_symbols
    }

    pub fn len(&self) -> usize {
        self.all_symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_symbols.is_empty()
    }
}

/// The final product of a compression run: the nested symbol tree plus the
/// semantic keys the pipeline distilled along the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolHierarchy {
    project_path: String,
    root_symbols: Vec<CodeSymbol>,
    extracted_keys: BTreeMap<String, String>,
    built_at: DateTime<Utc>,
}

impl SymbolHierarchy {
    pub fn new(
        project_path: String,
        root_symbols: Vec<CodeSymbol>,
        extracted_keys: BTreeMap<String, String>,
        built_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project_path,
            root_symbols,
            extracted_keys,
            built_at,
        }
    }

    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    pub fn root_symbols(&self) -> &[CodeSymbol] {
        &self.root_symbols
    }

    pub fn extracted_keys(&self) -> &BTreeMap<String, String> {
        &self.extracted_keys
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}
