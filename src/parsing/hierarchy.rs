//! Rebuilds the containment tree out of the flat symbol list. Parents are
//! decided purely by line ranges: the smallest range in the same file that
//! still contains a symbol wins. Deterministic for a deterministic input
//! ordering.

use std::collections::BTreeMap;

use super::types::CodeSymbol;

pub struct HierarchyAssembler;

impl HierarchyAssembler {
    /// Nest the flat symbols file by file and hand back the roots. Roots are
    /// emitted per file in input-file order, children sorted by start line.
    pub fn build(flat_symbols: &[CodeSymbol]) -> Vec<CodeSymbol> {
        let mut by_file: BTreeMap<&str, Vec<&CodeSymbol>> = BTreeMap::new();
        for symbol in flat_symbols {
            by_file.entry(symbol.file_path()).or_default().push(symbol);
        }

        let mut roots = Vec::new();
        for (_, symbols) in by_file {
            roots.extend(Self::build_file(&symbols));
        }
        roots
    }

    fn build_file(symbols: &[&CodeSymbol]) -> Vec<CodeSymbol> {
        // parent[i] = index of the smallest other symbol whose line range
        // contains symbol i
        let mut parents: Vec<Option<usize>> = vec![None; symbols.len()];
        for (index, symbol) in symbols.iter().enumerate() {
            let mut best: Option<usize> = None;
            for (candidate_index, candidate) in symbols.iter().enumerate() {
                if candidate_index == index || !candidate.contains_lines(symbol) {
                    continue;
                }
                // two identical ranges would each contain the other; skip the
                // pairing so neither becomes its own ancestor through the twin
                if candidate.start().line == symbol.start().line
                    && candidate.end().line == symbol.end().line
                    && candidate_index > index
                {
                    continue;
                }
                match best {
                    Some(best_index)
                        if symbols[best_index].line_span() <= candidate.line_span() => {}
                    _ => best = Some(candidate_index),
                }
            }
            parents[index] = best;
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); symbols.len()];
        let mut root_indices = Vec::new();
        for (index, parent) in parents.iter().enumerate() {
            match parent {
                Some(parent_index) => children[*parent_index].push(index),
                None => root_indices.push(index),
            }
        }

        root_indices
            .into_iter()
            .map(|index| Self::realize(index, symbols, &children))
            .collect()
    }

    fn realize(index: usize, symbols: &[&CodeSymbol], children: &[Vec<usize>]) -> CodeSymbol {
        let mut child_symbols = children[index]
            .iter()
            .map(|child| Self::realize(*child, symbols, children))
            .collect::<Vec<_>>();
        child_symbols.sort_by_key(|child| (child.start().line, child.start().character));
        symbols[index].clone().with_children(child_symbols)
    }
}
