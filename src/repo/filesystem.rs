/*
We are going to look at the file system and iterate along all the files
which might participate in an extraction run
*/

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use super::language::{is_ignored_dir, is_scratch_file};

pub const AVG_LINE_LEN: u64 = 30;
pub const MAX_LINE_COUNT: u64 = 20000;
pub const MAX_FILE_LEN: u64 = AVG_LINE_LEN * MAX_LINE_COUNT;

pub struct FileWalker {
    pub file_list: Vec<PathBuf>,
}

impl FileWalker {
    /// Walk the directory recursively. This observes the project's .gitignore
    /// (negations included, that is what the standard filters give us) on top
    /// of the universal ignores and the per-language directory defaults.
    pub fn index_directory(
        dir: impl AsRef<Path>,
        language_ignores: &'static [&'static str],
    ) -> FileWalker {
        let walker = WalkBuilder::new(&dir)
            .standard_filters(true)
            .hidden(false)
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                if entry.path().is_dir() {
                    !is_ignored_dir(&name) && !language_ignores.contains(&name.as_ref())
                } else {
                    !is_scratch_file(&name)
                }
            })
            .build();

        let mut file_list = walker
            .filter_map(|de| de.ok())
            // Preliminarily ignore files that are very large, without reading the contents.
            .filter(|de| matches!(de.metadata(), Ok(meta) if meta.is_file() && meta.len() < MAX_FILE_LEN))
            .filter_map(|de| std::fs::canonicalize(de.into_path()).ok())
            .collect::<Vec<_>>();
        // path-sorted file order keeps every downstream view deterministic
        file_list.sort();
        file_list.dedup();

        Self { file_list }
    }

    pub fn with_extensions(self, extensions: &[&str]) -> Vec<PathBuf> {
        self.file_list
            .into_iter()
            .filter(|path| {
                path.extension()
                    .and_then(|extension| extension.to_str())
                    .map(|extension| extensions.contains(&extension))
                    .unwrap_or(false)
            })
            .collect()
    }
}
