use crate::{
    config::IndexOptions,
    index::{DirectoryIndex, PakDirectory},
    path::{pak_path_combine, split_path_child},
    tree::DirectoryTree,
};
use std::collections::BTreeMap;

/// Compiled keep/drop wildcard policy. Paths and patterns are both
/// producer-normalized, so matching is case-sensitive.
pub(crate) struct PruneRules {
    files: Vec<glob::Pattern>,
    directories: Vec<glob::Pattern>,
}

fn compile(wildcards: &[String]) -> Vec<glob::Pattern> {
    wildcards
        .iter()
        .filter_map(|wildcard| match glob::Pattern::new(wildcard) {
            Ok(pattern) => Some(pattern),
            Err(error) => {
                tracing::warn!(wildcard = %wildcard, %error, "ignoring invalid prune wildcard");
                None
            }
        })
        .collect()
}

impl PruneRules {
    pub fn from_options(options: &IndexOptions) -> Self {
        PruneRules {
            files: compile(&options.directory_index_keep_files),
            directories: compile(&options.directory_index_keep_empty_directories),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }

    fn keeps_file(&self, full_path: &str) -> bool {
        self.files.iter().any(|pattern| pattern.matches(full_path))
    }

    fn keeps_directory(&self, full_path: &str) -> bool {
        self.directories
            .iter()
            .any(|pattern| pattern.matches(full_path))
    }
}

struct PruneOutcome {
    /// Directory name to the files surviving in it.
    kept_files: BTreeMap<String, PakDirectory>,
    /// Every visited or closure-added directory and its final verdict.
    keep_directory: BTreeMap<String, bool>,
}

/// One pass over a directory listing: decide per-file and per-directory
/// keeps, then close over every kept directory's parent chain up to the
/// mount point.
fn compute<'a>(
    directories: impl Iterator<Item = (String, &'a PakDirectory)>,
    mount_point: &str,
    rules: &PruneRules,
) -> PruneOutcome {
    let mut kept_files: BTreeMap<String, PakDirectory> = BTreeMap::new();
    let mut keep_directory: BTreeMap<String, bool> = BTreeMap::new();

    for (directory_name, directory) in directories {
        let full_directory = pak_path_combine(mount_point, &directory_name);
        let mut keep = false;
        for (leaf, location) in directory {
            let full_path = pak_path_combine(&full_directory, leaf);
            if rules.keeps_file(&full_path) {
                keep = true;
                kept_files
                    .entry(directory_name.clone())
                    .or_default()
                    .insert(leaf.clone(), *location);
            }
        }
        if !keep {
            keep = rules.keeps_directory(&full_directory);
        }
        keep_directory.insert(directory_name, keep);
    }

    // every kept directory keeps its ancestors, up to the mount point
    let kept: Vec<String> = keep_directory
        .iter()
        .filter(|(_, keep)| **keep)
        .map(|(name, _)| name.clone())
        .collect();
    for directory in &kept {
        let mut current: &str = directory;
        while let Some((parent, _)) = split_path_child(current) {
            current = parent;
            let keep = keep_directory.entry(current.to_string()).or_insert(false);
            if *keep {
                break;
            }
            *keep = true;
        }
    }

    PruneOutcome {
        kept_files,
        keep_directory,
    }
}

/// Prune a directory map. With a side output the input is left untouched and
/// the pruned subset lands there; otherwise the map is collapsed in place.
/// Empty rules erase the directory index entirely, leaving lookups to the
/// path-hash index.
pub(crate) fn prune_directory_index(
    index: &mut DirectoryIndex,
    side: Option<&mut DirectoryIndex>,
    mount_point: &str,
    rules: &PruneRules,
) {
    if rules.is_empty() {
        match side {
            Some(side) => side.clear(),
            None => index.clear(),
        }
        return;
    }

    let mut outcome = compute(
        index.iter().map(|(name, dir)| (name.clone(), dir)),
        mount_point,
        rules,
    );

    match side {
        Some(side) => {
            side.clear();
            for (directory, keep) in outcome.keep_directory {
                if keep {
                    side.insert(
                        directory.clone(),
                        outcome.kept_files.remove(&directory).unwrap_or_default(),
                    );
                }
            }
        }
        None => {
            for (directory, keep) in outcome.keep_directory {
                if keep {
                    if let Some(files) = index.get_mut(&directory) {
                        *files = outcome.kept_files.remove(&directory).unwrap_or_default();
                    }
                } else {
                    index.remove(&directory);
                }
            }
        }
    }
}

/// Tree counterpart of [`prune_directory_index`], preserving the map/tree
/// equivalence invariant when both are pruned with the same rules.
pub(crate) fn prune_directory_tree(
    tree: &mut DirectoryTree,
    side: Option<&mut DirectoryTree>,
    mount_point: &str,
    rules: &PruneRules,
) {
    if rules.is_empty() {
        match side {
            Some(side) => side.clear(),
            None => tree.clear(),
        }
        return;
    }

    let mut outcome = compute(
        tree.iter().map(|(name, dir)| (name, dir)),
        mount_point,
        rules,
    );

    match side {
        Some(side) => {
            side.clear();
            for (directory, keep) in outcome.keep_directory {
                if keep {
                    *side.find_or_add(&directory) =
                        outcome.kept_files.remove(&directory).unwrap_or_default();
                }
            }
        }
        None => {
            for (directory, keep) in outcome.keep_directory {
                if keep {
                    if let Some(files) = tree.find_mut(&directory) {
                        *files = outcome.kept_files.remove(&directory).unwrap_or_default();
                    }
                } else {
                    tree.remove(&directory);
                }
            }
        }
    }
}
