//! Tree-sitter bindings for the languages we can extract symbols from. Every
//! language contributes a grammar and a set of capture queries following the
//! `<kind>.name` / `<kind>.body` naming contract; everything else in the
//! pipeline is language-agnostic.

use std::collections::{BTreeSet, HashSet};

use thiserror::Error;
use tracing::warn;

use super::csharp::csharp_language_config;
use super::go::go_language_config;
use super::javascript::javascript_language_config;
use super::python::python_language_config;
use super::rust::rust_language_config;
use super::types::{CodeLocation, CodeSymbol, SymbolKind};
use super::typescript::typescript_language_config;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("source is not valid utf-8: {0}")]
    InvalidSource(#[from] std::str::Utf8Error),

    #[error("tree-sitter rejected the source for {0}")]
    UnparseableSource(String),

    #[error("malformed capture query: {0}")]
    MalformedQuery(#[from] tree_sitter::QueryError),

    #[error("grammar version mismatch")]
    GrammarMismatch(#[from] tree_sitter::LanguageError),
}

/// Per-language configuration: which files it claims, how to get a grammar
/// and the queries that capture the nine symbol kinds.
#[derive(Debug, Clone)]
pub struct TSLanguageConfig {
    /// A list of language names which map to this config, e.g.
    /// ["Typescript", "TSX"], ["Rust"]
    pub language_ids: &'static [&'static str],

    /// Extensions that can help classify the file: rs, py, cs, go, ...
    pub file_extensions: &'static [&'static str],

    /// tree-sitter grammar for this language
    pub grammar: fn() -> tree_sitter::Language,

    /// The capture queries which produce `<kind>.name`/`<kind>.body` pairs.
    /// Query order doubles as capture precedence: when two queries capture
    /// the same (name, start) the earlier query wins, which is how methods
    /// take priority over the plain function pattern.
    pub symbol_query: Vec<String>,
}

impl TSLanguageConfig {
    pub fn get_language(&self) -> Option<String> {
        self.language_ids.first().map(|s| s.to_string())
    }

    /// Parses the source and runs every capture query, assembling one
    /// `CodeSymbol` per match that carries both a `.name` and a `.body`
    /// capture. The symbol starts at the name capture and ends at the end of
    /// the body capture. Recoverable parse errors still yield the symbols
    /// tree-sitter managed to recognize.
    pub fn parse(&self, source_bytes: &[u8], file_path: &str) -> Result<Vec<CodeSymbol>, ParseError> {
        let source = std::str::from_utf8(source_bytes)?;
        let grammar = self.grammar;
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(grammar())?;
        let tree = parser
            .parse(source_bytes, None)
            .ok_or_else(|| ParseError::UnparseableSource(file_path.to_owned()))?;
        let lines = source.split('\n').collect::<Vec<_>>();

        let mut symbols = Vec::new();
        let mut seen: HashSet<(String, u32, u32)> = HashSet::new();
        for query_text in self.symbol_query.iter() {
            let query = tree_sitter::Query::new(grammar(), query_text)?;
            let capture_names = query.capture_names();
            let mut cursor = tree_sitter::QueryCursor::new();
            for query_match in cursor.matches(&query, tree.root_node(), source_bytes) {
                let mut name_node = None;
                let mut body_node = None;
                let mut kind = None;
                for capture in query_match.captures {
                    let capture_name = &capture_names[capture.index as usize];
                    let Some((prefix, role)) = capture_name.rsplit_once('.') else {
                        continue;
                    };
                    match role {
                        "name" => {
                            kind = SymbolKind::from_capture_prefix(prefix);
                            name_node = Some(capture.node);
                        }
                        "body" => body_node = Some(capture.node),
                        _ => {}
                    }
                }
                let (Some(kind), Some(name_node), Some(body_node)) = (kind, name_node, body_node)
                else {
                    continue;
                };
                let name = source[name_node.byte_range()].to_owned();
                if name.is_empty() {
                    continue;
                }
                let kind = reclassify_constructors(kind, &name);
                let start = location_of(name_node.start_position(), &lines);
                let end = location_of(body_node.end_position(), &lines);
                if !seen.insert((name.clone(), start.line, start.character)) {
                    continue;
                }
                symbols.push(CodeSymbol::new(
                    name,
                    kind,
                    file_path.to_owned(),
                    start,
                    end,
                ));
            }
        }
        // the per-file contract is start-line order
        symbols.sort_by_key(|symbol| (symbol.start().line, symbol.start().character));
        let symbols = link_dependencies(symbols, &lines);
        Ok(symbols)
    }
}

/// Best-effort dependency edges: symbol A depends on symbol B when B's name
/// shows up as a word inside A's source range. Purely lexical, which is all
/// the downstream consumers expect from the optional `dependencies` set.
fn link_dependencies(symbols: Vec<CodeSymbol>, lines: &[&str]) -> Vec<CodeSymbol> {
    let matchers = symbols
        .iter()
        .map(|symbol| {
            regex::Regex::new(&format!(r"\b{}\b", regex::escape(symbol.name()))).ok()
        })
        .collect::<Vec<_>>();

    let slice_of = |symbol: &CodeSymbol| -> String {
        let start = symbol.start().line as usize;
        let end = (symbol.end().line as usize).min(lines.len().saturating_sub(1));
        if start > end {
            return String::new();
        }
        lines[start..=end].join("\n")
    };

    let names = symbols
        .iter()
        .map(|symbol| symbol.name().to_owned())
        .collect::<Vec<_>>();
    symbols
        .into_iter()
        .map(|symbol| {
            let body = slice_of(&symbol);
            let dependencies = names
                .iter()
                .zip(matchers.iter())
                .filter(|(name, _)| name.as_str() != symbol.name())
                .filter(|(_, matcher)| {
                    matcher
                        .as_ref()
                        .map(|matcher| matcher.is_match(&body))
                        .unwrap_or(false)
                })
                .map(|(name, _)| name.clone())
                .collect::<BTreeSet<_>>();
            if dependencies.is_empty() {
                symbol
            } else {
                symbol.with_dependencies(dependencies)
            }
        })
        .collect()
}

/// Languages without a dedicated constructor node still surface their
/// constructors under a well-known method name.
fn reclassify_constructors(kind: SymbolKind, name: &str) -> SymbolKind {
    if kind == SymbolKind::Method && (name == "__init__" || name == "constructor") {
        SymbolKind::Constructor
    } else {
        kind
    }
}

/// tree-sitter points carry byte columns; the symbol contract wants character
/// columns into the decoded line.
fn location_of(point: tree_sitter::Point, lines: &[&str]) -> CodeLocation {
    let character = match lines.get(point.row) {
        Some(line) => line
            .char_indices()
            .take_while(|(byte_offset, _)| *byte_offset < point.column)
            .count(),
        None => point.column,
    };
    CodeLocation::new(point.row as u32, character as u32)
}

#[derive(Clone)]
pub struct TSLanguageParsing {
    configs: Vec<TSLanguageConfig>,
}

impl TSLanguageParsing {
    pub fn init() -> Self {
        Self {
            configs: vec![
                csharp_language_config(),
                python_language_config(),
                javascript_language_config(),
                typescript_language_config(),
                rust_language_config(),
                go_language_config(),
            ],
        }
    }

    pub fn for_lang(&self, language: &str) -> Option<&TSLanguageConfig> {
        self.configs
            .iter()
            .find(|config| config.language_ids.contains(&language))
    }

    pub fn for_file_extension(&self, extension: &str) -> Option<&TSLanguageConfig> {
        self.configs
            .iter()
            .find(|config| config.file_extensions.contains(&extension))
    }

    pub fn configs(&self) -> &[TSLanguageConfig] {
        &self.configs
    }

    /// Parse one file with whatever binding claims its extension. No binding
    /// is not an error, the file just contributes nothing.
    pub fn parse_file(
        &self,
        source_bytes: &[u8],
        file_path: &str,
        extension: &str,
    ) -> Result<Vec<CodeSymbol>, ParseError> {
        match self.for_file_extension(extension) {
            Some(config) => config.parse(source_bytes, file_path),
            None => {
                warn!(%file_path, %extension, "no language binding, skipping file");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TSLanguageParsing;
    use crate::parsing::types::SymbolKind;

    #[test]
    fn every_language_query_compiles() {
        let parsing = TSLanguageParsing::init();
        for config in parsing.configs() {
            let grammar = config.grammar;
            for query in config.symbol_query.iter() {
                tree_sitter::Query::new(grammar(), query).unwrap_or_else(|err| {
                    panic!(
                        "query for {:?} failed to compile: {:?}",
                        config.language_ids, err
                    )
                });
            }
        }
    }

    #[test]
    fn rust_functions_and_methods_are_separated() {
        let source = r#"
fn free_standing() {
    let _ = 1;
}

struct Holder {
    inner: String,
}

impl Holder {
    fn with_inner(&self) -> &str {
        &self.inner
    }
}
"#;
        let parsing = TSLanguageParsing::init();
        let config = parsing.for_lang("rust").unwrap();
        let symbols = config.parse(source.as_bytes(), "/tmp/holder.rs").unwrap();

        let free = symbols.iter().find(|s| s.name() == "free_standing").unwrap();
        assert_eq!(free.kind(), SymbolKind::Function);

        let holder = symbols.iter().find(|s| s.name() == "Holder").unwrap();
        assert_eq!(holder.kind(), SymbolKind::Class);

        let method = symbols.iter().find(|s| s.name() == "with_inner").unwrap();
        assert_eq!(method.kind(), SymbolKind::Method);

        let field = symbols.iter().find(|s| s.name() == "inner").unwrap();
        assert_eq!(field.kind(), SymbolKind::Field);

        // lexical dependency edges: the method reads the field, the free
        // function touches nothing
        assert!(method.dependencies().contains("inner"));
        assert!(free.dependencies().is_empty());
    }

    #[test]
    fn python_init_is_a_constructor() {
        let source = r#"
class Widget:
    def __init__(self):
        self.size = 1

    def resize(self):
        self.size += 1

def helper():
    return 42
"#;
        let parsing = TSLanguageParsing::init();
        let config = parsing.for_lang("python").unwrap();
        let symbols = config.parse(source.as_bytes(), "/tmp/widget.py").unwrap();

        let init = symbols.iter().find(|s| s.name() == "__init__").unwrap();
        assert_eq!(init.kind(), SymbolKind::Constructor);

        let resize = symbols.iter().find(|s| s.name() == "resize").unwrap();
        assert_eq!(resize.kind(), SymbolKind::Method);

        let helper = symbols.iter().find(|s| s.name() == "helper").unwrap();
        assert_eq!(helper.kind(), SymbolKind::Function);

        let class = symbols.iter().find(|s| s.name() == "Widget").unwrap();
        assert_eq!(class.kind(), SymbolKind::Class);
        assert!(class.start().line < init.start().line);
    }

    #[test]
    fn go_types_and_receivers() {
        let source = r#"
package main

func Add(a int, b int) int {
	return a + b
}

type Point struct {
	X int
}

func (p Point) Norm() int {
	return p.X
}

type Shape interface {
	Area() int
}
"#;
        let parsing = TSLanguageParsing::init();
        let config = parsing.for_lang("Go").unwrap();
        let symbols = config.parse(source.as_bytes(), "/tmp/geo.go").unwrap();

        assert!(symbols
            .iter()
            .any(|s| s.name() == "Add" && s.kind() == SymbolKind::Function));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Point" && s.kind() == SymbolKind::Class));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "X" && s.kind() == SymbolKind::Field));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Norm" && s.kind() == SymbolKind::Method));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Shape" && s.kind() == SymbolKind::Interface));
    }

    #[test]
    fn typescript_surface_kinds() {
        let source = r#"
interface Options {
  retries: number;
}

enum Mode {
  Fast,
  Slow = 9,
}

class Runner {
  limit: number = 3;

  constructor() {
  }

  run(): void {
  }
}

function make(): Runner {
  return new Runner();
}

const double = (x: number) => x * 2;
"#;
        let parsing = TSLanguageParsing::init();
        let config = parsing.for_lang("typescript").unwrap();
        let symbols = config.parse(source.as_bytes(), "/tmp/runner.ts").unwrap();

        assert!(symbols
            .iter()
            .any(|s| s.name() == "Options" && s.kind() == SymbolKind::Interface));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Mode" && s.kind() == SymbolKind::Enum));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Fast" && s.kind() == SymbolKind::EnumMember));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Slow" && s.kind() == SymbolKind::EnumMember));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Runner" && s.kind() == SymbolKind::Class));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "limit" && s.kind() == SymbolKind::Property));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "constructor" && s.kind() == SymbolKind::Constructor));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "run" && s.kind() == SymbolKind::Method));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "make" && s.kind() == SymbolKind::Function));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "double" && s.kind() == SymbolKind::Function));
    }

    #[test]
    fn csharp_surface_kinds() {
        let source = r#"
namespace Geometry
{
    public enum Axis
    {
        X,
        Y
    }

    public class Circle
    {
        private double radius;

        public Circle(double radius)
        {
            this.radius = radius;
        }

        public double Radius
        {
            get { return radius; }
        }

        public double Area()
        {
            return 3.14 * radius * radius;
        }
    }

    public interface IShape
    {
        double Area();
    }
}
"#;
        let parsing = TSLanguageParsing::init();
        let config = parsing.for_lang("csharp").unwrap();
        let symbols = config.parse(source.as_bytes(), "/tmp/geometry.cs").unwrap();

        assert!(symbols
            .iter()
            .any(|s| s.name() == "Geometry" && s.kind() == SymbolKind::Namespace));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Axis" && s.kind() == SymbolKind::Enum));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "X" && s.kind() == SymbolKind::EnumMember));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Circle" && s.kind() == SymbolKind::Class));
        // the constructor shares the class name, different location
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Circle" && s.kind() == SymbolKind::Constructor));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "radius" && s.kind() == SymbolKind::Field));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Radius" && s.kind() == SymbolKind::Property));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Area" && s.kind() == SymbolKind::Method));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "IShape" && s.kind() == SymbolKind::Interface));
    }

    #[test]
    fn javascript_functions_and_classes() {
        let source = r#"
function greet(name) {
  return "hi " + name;
}

const shout = (name) => name.toUpperCase();

class Speaker {
  speak() {
    return greet("world");
  }
}
"#;
        let parsing = TSLanguageParsing::init();
        let config = parsing.for_lang("javascript").unwrap();
        let symbols = config.parse(source.as_bytes(), "/tmp/speak.js").unwrap();

        assert!(symbols
            .iter()
            .any(|s| s.name() == "greet" && s.kind() == SymbolKind::Function));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "shout" && s.kind() == SymbolKind::Function));
        assert!(symbols
            .iter()
            .any(|s| s.name() == "Speaker" && s.kind() == SymbolKind::Class));
        let speak = symbols.iter().find(|s| s.name() == "speak").unwrap();
        assert_eq!(speak.kind(), SymbolKind::Method);
        assert!(speak.dependencies().contains("greet"));
    }

    #[test]
    fn symbols_come_back_start_line_sorted() {
        let source = "fn zz() {}\nfn aa() {}\nfn mm() {}\n";
        let parsing = TSLanguageParsing::init();
        let config = parsing.for_lang("rust").unwrap();
        let symbols = config.parse(source.as_bytes(), "/tmp/sorted.rs").unwrap();
        let names = symbols.iter().map(|s| s.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["zz", "aa", "mm"]);
        assert!(symbols.windows(2).all(|w| w[0].start().line <= w[1].start().line));
    }
}
