//! Parameter types for a single compression call.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which prompt family drives the run, from mild to maximal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    Optimize,
    Compress,
    Golf,
    Endgame,
}

impl CompressionLevel {
    /// The `<prefix>` half of prompt names.
    pub fn prefix(&self) -> &'static str {
        match self {
            CompressionLevel::Optimize => "optimize",
            CompressionLevel::Compress => "compress",
            CompressionLevel::Golf => "golf",
            CompressionLevel::Endgame => "endgame",
        }
    }
}

/// The ephemeral parameter bundle for one `optimize_symbol` call: which scope
/// we are summarizing at, which keys are already known and which prompt
/// family to use.
#[derive(Debug, Clone)]
pub struct OptimizationContext {
    /// 1 = function scope, 2 = class scope
    level: u8,
    /// 0, 1 or 2 entries: `[]`, `[K1]` or `[K1, K2]`
    available_keys: Vec<String>,
    compression_level: CompressionLevel,
}

impl OptimizationContext {
    pub fn new(level: u8, available_keys: Vec<String>, compression_level: CompressionLevel) -> Self {
        debug_assert!(level == 1 || level == 2);
        Self {
            level,
            available_keys,
            compression_level,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn available_keys(&self) -> &[String] {
        &self.available_keys
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.compression_level
    }

    /// The `availableKeys` prompt parameter: dash-prefixed lines, or the
    /// literal `None` when nothing has been extracted yet.
    pub fn render_available_keys(&self) -> String {
        if self.available_keys.is_empty() {
            "None".to_owned()
        } else {
            self.available_keys
                .iter()
                .map(|key| format!("- {key}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CompressionLevel, OptimizationContext};

    #[test]
    fn keys_render_as_dash_lines_or_none() {
        let empty = OptimizationContext::new(1, vec![], CompressionLevel::Compress);
        assert_eq!(empty.render_available_keys(), "None");

        let with_keys = OptimizationContext::new(
            2,
            vec!["uses builder pattern".to_owned(), "async".to_owned()],
            CompressionLevel::Compress,
        );
        assert_eq!(
            with_keys.render_available_keys(),
            "- uses builder pattern\n- async"
        );
    }
}
