/// Which in-memory representation backs directory lookups. `Both` keeps the
/// tree and the map populated and cross-checks them on every search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryBackend {
    #[default]
    Map,
    Tree,
    Both,
}

impl DirectoryBackend {
    pub(crate) fn stores_map(&self) -> bool {
        matches!(self, DirectoryBackend::Map | DirectoryBackend::Both)
    }

    pub(crate) fn stores_tree(&self) -> bool {
        matches!(self, DirectoryBackend::Tree | DirectoryBackend::Both)
    }
}

/// Index-loading settings, fixed for the lifetime of a mount. These are
/// decided by the embedding application (typically from its config layer)
/// and shared by reference into every archive.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Keep the full directory index in memory after load. When false, the
    /// directory index is pruned down to the configured wildcards and
    /// lookups go through the path-hash index.
    pub keep_full_directory: bool,
    /// Cross-check pruned results against the full index after load.
    pub validate_pruning: bool,
    /// Defer pruning to an explicit post-mount step.
    pub delay_pruning: bool,
    /// Directory lookup backend selection.
    pub directory_backend: DirectoryBackend,
    /// Wildcards for files to keep when pruning.
    pub directory_index_keep_files: Vec<String>,
    /// Wildcards for directories to keep (as empty entries) when pruning.
    pub directory_index_keep_empty_directories: Vec<String>,
    /// Wildcards excluded from pruning cross-checks.
    pub index_validation_ignore: Vec<String>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            keep_full_directory: true,
            validate_pruning: false,
            delay_pruning: false,
            directory_backend: DirectoryBackend::Map,
            directory_index_keep_files: vec![],
            directory_index_keep_empty_directories: vec![],
            index_validation_ignore: vec![],
        }
    }
}
