//! Language detection and the exclusion lists which decide what the walker
//! even looks at.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::parsing::languages::TSLanguageParsing;

/// Directories nothing should ever crawl into, independent of language.
const UNIVERSAL_IGNORE_DIRS: &[&str] = &[".git", ".svn", ".hg", ".idea", ".vscode"];

/// Editor droppings and scratch files which are never source.
const SCRATCH_FILE_SUFFIXES: &[&str] = &[".swp", ".swo", ".tmp", ".bak", "~"];

pub fn is_ignored_dir(name: &str) -> bool {
    UNIVERSAL_IGNORE_DIRS.contains(&name)
}

pub fn is_scratch_file(name: &str) -> bool {
    if name == ".DS_Store" {
        return true;
    }
    SCRATCH_FILE_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// Build-output and dependency directories per language. These apply on top
/// of the universal list and the project's own .gitignore.
pub fn ignore_dirs_for(language: &str) -> &'static [&'static str] {
    match language {
        "C#" | "csharp" | "c_sharp" => &["bin", "obj", "packages"],
        "Python" | "python" => &["__pycache__", "venv", ".venv", "site-packages"],
        "Javascript" | "javascript" | "Typescript" | "typescript" => {
            &["node_modules", "dist", "build", ".next"]
        }
        "Rust" | "rust" => &["target"],
        "Go" | "go" => &["vendor"],
        _ => &[],
    }
}

/// Extension-majority heuristic: whichever configured language claims the
/// most files wins. Returns the canonical language id of the winner.
pub fn detect_primary_language(
    files: &[PathBuf],
    parsing: &TSLanguageParsing,
) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for file in files {
        let Some(extension) = file.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if let Some(config) = parsing.for_file_extension(extension) {
            if let Some(language) = config.get_language() {
                *counts.entry(language).or_default() += 1;
            }
        }
    }
    counts
        .into_iter()
        // deterministic winner when two languages tie on file count
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(language, _)| language)
}
