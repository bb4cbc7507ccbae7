use crate::{
    config::IndexOptions,
    crypto::{KeyStore, NoKeys},
    entry::Entry,
    index::{add_entry_to_index, DirectoryIndex, EntryLocation, EntryStore, IndexSinks, PakDirectory, PathHashIndex},
    loader::{load_index, negotiate_trailer},
    path::{
        make_directory_from_path, pak_path_combine, relative_from_mount, split_path_child,
    },
    prune::{prune_directory_index, prune_directory_tree, PruneRules},
    reader::{ReaderFactory, ReaderPool, SharedReader},
    ser,
    signed::{ChunkSignatureVerifierSource, SignatureFailure, SignatureFailureHandlers},
    tree::DirectoryTree,
    Error, Info, Result,
};
use std::collections::BTreeSet;
use std::io::{Seek, SeekFrom};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Outcome of a path lookup. A `FoundDeleted` path is shadowed by a delete
/// record and must not fall through to other archives' copies.
#[derive(Debug, PartialEq)]
pub enum FindResult {
    Found(Box<Entry>),
    FoundDeleted,
    NotFound,
}

/// Directory-index side of the archive. Lives behind one RwLock so pruning
/// swaps the view atomically under concurrent readers.
#[derive(Default)]
struct DirectoryState {
    index: Option<DirectoryIndex>,
    tree: Option<DirectoryTree>,
    pruned_index: Option<DirectoryIndex>,
    pruned_tree: Option<DirectoryTree>,
    has_full: bool,
    will_prune: bool,
    needs_legacy_pruning: bool,
}

impl DirectoryState {
    /// Look one relative file path up in the active backend(s). With both
    /// backends live the tree answers and the map cross-checks it.
    fn find_location(&self, relative_path: &str, filename: &str) -> Option<EntryLocation> {
        let (directory, leaf) = split_path_child(relative_path)?;
        let from_tree = self
            .tree
            .as_ref()
            .map(|tree| tree.find(directory).and_then(|dir| dir.get(leaf).copied()));
        let from_map = self
            .index
            .as_ref()
            .map(|map| map.get(directory).and_then(|dir| dir.get(leaf).copied()));
        match (from_tree, from_map) {
            (Some(tree), Some(map)) => {
                if tree.is_some() != map.is_some() {
                    tracing::error!(
                        filename,
                        relative_path,
                        "mismatch between directory map and directory tree search"
                    );
                }
                tree.or(map)
            }
            (Some(tree), None) => tree,
            (None, Some(map)) => map,
            (None, None) => None,
        }
    }

    fn directory(&self, name: &str) -> Option<&PakDirectory> {
        match &self.tree {
            Some(tree) => tree.find(name),
            None => self.index.as_ref()?.get(name),
        }
    }

    fn directory_keys(&self) -> Vec<String> {
        match &self.tree {
            Some(tree) => tree.iter().map(|(name, _)| name).collect(),
            None => self
                .index
                .as_ref()
                .map(|index| index.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Directories at or under `relative` (directory form), in path order.
    fn directories_under(&self, relative: &str) -> Vec<(String, &PakDirectory)> {
        Self::list_under(self.tree.as_ref(), self.index.as_ref(), relative)
    }

    /// Same view over the parked pruned copy, for validation.
    fn pruned_directories_under(&self, relative: &str) -> Vec<(String, &PakDirectory)> {
        Self::list_under(self.pruned_tree.as_ref(), self.pruned_index.as_ref(), relative)
    }

    fn list_under<'a>(
        tree: Option<&'a DirectoryTree>,
        index: Option<&'a DirectoryIndex>,
        relative: &str,
    ) -> Vec<(String, &'a PakDirectory)> {
        if let Some(tree) = tree {
            return tree.iter_prefix(relative).collect();
        }
        let Some(index) = index else {
            return vec![];
        };
        let prefix = if relative == "/" { "" } else { relative };
        let mut result = vec![];
        if let Some(own) = index.get(relative) {
            result.push((relative.to_string(), own));
        }
        for (name, directory) in
            index.range::<str, _>((Bound::Excluded(relative), Bound::Unbounded))
        {
            if !name.starts_with(prefix) {
                break;
            }
            result.push((name.clone(), directory));
        }
        result
    }
}

/// Builder for mounting archives, carrying the cross-cutting collaborators.
pub struct PakBuilder {
    options: IndexOptions,
    keys: Arc<dyn KeyStore>,
    signatures: Option<Arc<dyn ChunkSignatureVerifierSource>>,
}

impl Default for PakBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PakBuilder {
    pub fn new() -> Self {
        PakBuilder {
            options: IndexOptions::default(),
            keys: Arc::new(NoKeys),
            signatures: None,
        }
    }

    pub fn options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key_store(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.keys = keys;
        self
    }

    /// Convenience for the common case of one embedded AES key.
    #[cfg(feature = "encryption")]
    pub fn key(mut self, key: aes::Aes256) -> Self {
        self.keys = Arc::new(crate::StaticKeyStore::with_default_key(key));
        self
    }

    /// Mark the archive as signed; every pooled reader will verify signing
    /// chunks through the single shared verifier.
    pub fn signatures(mut self, source: Arc<dyn ChunkSignatureVerifierSource>) -> Self {
        self.signatures = Some(source);
        self
    }

    pub fn mount(
        self,
        factory: Arc<dyn ReaderFactory>,
        filename: impl Into<String>,
    ) -> Result<PakFile> {
        PakFile::mount_inner(
            factory,
            filename.into(),
            Arc::new(self.options),
            self.keys,
            self.signatures,
        )
    }
}

/// A mounted read-side archive: validated trailer, decoded indexes, pooled
/// readers. Immutable after mount except for the pruning swap,
/// [`PakFile::add_special_file`] and reader-pool churn.
pub struct PakFile {
    filename: String,
    options: Arc<IndexOptions>,
    info: Info,
    total_size: i64,
    mount_point: String,
    num_entries: usize,
    path_hash_seed: u64,
    store: EntryStore,
    path_hash_index: Option<PathHashIndex>,
    directory: RwLock<DirectoryState>,
    readers: ReaderPool,
    has_path_hash_index: bool,
    valid: bool,
}

impl PakFile {
    fn mount_inner(
        factory: Arc<dyn ReaderFactory>,
        filename: String,
        options: Arc<IndexOptions>,
        keys: Arc<dyn KeyStore>,
        signatures: Option<Arc<dyn ChunkSignatureVerifierSource>>,
    ) -> Result<PakFile> {
        let handlers = Arc::new(SignatureFailureHandlers::new());
        let readers = ReaderPool::new(factory, signatures, handlers);

        let (info, total_size, loaded) = {
            let mut reader = readers.shared_reader()?;
            let total_size = reader.seek(SeekFrom::End(0))? as i64;
            let info = negotiate_trailer(&mut reader, total_size)?;

            if info.index_offset < 0 || info.index_offset >= total_size {
                return Err(Error::IndexOutOfBounds {
                    kind: "primary index",
                    offset: info.index_offset,
                    size: info.index_size,
                    total: total_size,
                });
            }

            // A dynamic key that has not arrived yet leaves the archive
            // mounted but unloadable; callers may retry after key install.
            if info.encryption_key_guid != 0 && !keys.contains_key(info.encryption_key_guid) {
                tracing::debug!(
                    filename = %filename,
                    guid = %format_args!("{:032x}", info.encryption_key_guid),
                    "deferring index load until the encryption key is available"
                );
                (info, total_size, None)
            } else {
                let loaded = load_index(
                    &mut reader,
                    total_size,
                    &info,
                    &filename,
                    &options,
                    keys.as_ref(),
                )?;
                (info, total_size, Some(loaded))
            }
        };

        let valid = loaded.is_some();
        let mut pak = PakFile {
            filename,
            options,
            info,
            total_size,
            mount_point: String::new(),
            num_entries: 0,
            path_hash_seed: 0,
            store: EntryStore::default(),
            path_hash_index: None,
            directory: RwLock::new(DirectoryState::default()),
            readers,
            has_path_hash_index: false,
            valid,
        };

        if let Some(loaded) = loaded {
            pak.mount_point = loaded.mount_point;
            pak.num_entries = loaded.num_entries as usize;
            pak.path_hash_seed = loaded.path_hash_seed;
            pak.store = EntryStore {
                encoded: loaded.encoded,
                files: loaded.files,
            };
            pak.path_hash_index = loaded.path_hash_index;
            pak.has_path_hash_index = loaded.has_path_hash_index;
            pak.directory = RwLock::new(DirectoryState {
                index: loaded.directory_index,
                tree: loaded.directory_tree,
                pruned_index: loaded.pruned_directory_index,
                pruned_tree: loaded.pruned_directory_tree,
                has_full: loaded.has_full_directory_index,
                will_prune: loaded.will_prune_directory_index,
                needs_legacy_pruning: loaded.needs_legacy_pruning,
            });
        }

        Ok(pak)
    }

    /// False when the index could not be loaded (missing encryption key);
    /// only metadata queries are meaningful then.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn path_hash_seed(&self) -> u64 {
        self.path_hash_seed
    }

    pub fn total_size(&self) -> i64 {
        self.total_size
    }

    pub fn has_path_hash_index(&self) -> bool {
        self.has_path_hash_index
    }

    pub fn has_full_directory_index(&self) -> bool {
        self.read_state().has_full
    }

    fn read_state(&self) -> RwLockReadGuard<'_, DirectoryState> {
        self.directory.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, DirectoryState> {
        self.directory.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Materialize the entry behind a location; `None` means delete record.
    pub fn entry(&self, location: EntryLocation) -> Result<Option<Entry>> {
        self.store.entry(location, &self.info)
    }

    fn find_location_by_hash(&self, full_path: &str) -> Option<EntryLocation> {
        let relative = relative_from_mount(full_path, &self.mount_point)?;
        let hash = crate::path::hash_path(relative, self.path_hash_seed, self.info.version);
        self.path_hash_index.as_ref()?.get(&hash).copied()
    }

    fn find_location_in_directory(
        &self,
        state: &DirectoryState,
        full_path: &str,
    ) -> Option<EntryLocation> {
        let relative = relative_from_mount(full_path, &self.mount_point)?;
        if relative.is_empty() {
            return None;
        }
        state.find_location(relative, &self.filename)
    }

    /// Resolve a full path to its entry. Prefers the path-hash index; in
    /// validation mode both indexes answer and a disagreement is logged
    /// loudly with the non-null result winning. Paths outside the mount
    /// point are simply not found.
    pub fn find(&self, full_path: &str) -> FindResult {
        let location = if self.options.validate_pruning && self.has_path_hash_index {
            let state = self.read_state();
            if state.has_full {
                let hash_location = self.find_location_by_hash(full_path);
                let directory_location = self.find_location_in_directory(&state, full_path);
                if hash_location.is_some() != directory_location.is_some() {
                    let (found, not_found) = if hash_location.is_some() {
                        ("path hash index", "full directory index")
                    } else {
                        ("full directory index", "path hash index")
                    };
                    tracing::error!(
                        filename = %self.filename,
                        full_path,
                        found_in = found,
                        missing_from = not_found,
                        "path hash index does not match full directory index"
                    );
                }
                hash_location.or(directory_location)
            } else {
                self.find_location_by_hash(full_path)
            }
        } else if self.has_path_hash_index {
            self.find_location_by_hash(full_path)
        } else {
            let state = self.read_state();
            self.find_location_in_directory(&state, full_path)
        };

        match location {
            None => FindResult::NotFound,
            Some(EntryLocation::Invalid) => FindResult::FoundDeleted,
            Some(location) => match self.entry(location) {
                Ok(Some(entry)) => FindResult::Found(Box::new(entry)),
                Ok(None) => FindResult::FoundDeleted,
                Err(error) => {
                    tracing::error!(
                        filename = %self.filename,
                        full_path,
                        %error,
                        "failed to materialize index entry"
                    );
                    FindResult::NotFound
                }
            },
        }
    }

    /// Lazily walk every indexed entry. Directory-backed iteration yields
    /// mount-relative filenames and holds the directory read lock for the
    /// iterator's lifetime; path-hash iteration yields no filenames and
    /// needs no lock.
    pub fn entries(&self, include_deleted: bool, use_path_hash: bool) -> EntryIterator<'_> {
        let backing = if use_path_hash {
            debug_assert!(self.has_path_hash_index);
            match &self.path_hash_index {
                Some(index) => IterBacking::PathHash(index.iter()),
                None => IterBacking::Done,
            }
        } else {
            let guard = self.read_state();
            let dirs = guard.directory_keys();
            IterBacking::Directory {
                guard,
                dirs,
                dir_position: 0,
                file_cursor: None,
            }
        };
        EntryIterator {
            include_deleted,
            backing,
        }
    }

    /// Every surviving filename, in mount-absolute form.
    pub fn pruned_filenames(&self) -> Vec<String> {
        self.entries(true, false)
            .filter_map(|(name, _)| name)
            .map(|relative| pak_path_combine(&self.mount_point, &relative))
            .collect()
    }

    /// Enumerate files and/or child directories at `path`, walking the
    /// (possibly pruned) directory index. Results are mount-absolute.
    pub fn files_at_path(
        &self,
        path: &str,
        recursive: bool,
        include_files: bool,
        include_directories: bool,
    ) -> Vec<String> {
        let mut query = path.to_string();
        make_directory_from_path(&mut query);
        let Some(relative) = relative_from_mount(&query, &self.mount_point) else {
            return vec![];
        };
        let relative = if relative.is_empty() { "/" } else { relative };

        let state = self.read_state();
        let results = Self::collect_files(
            state.directories_under(relative),
            relative,
            &self.mount_point,
            recursive,
            include_files,
            include_directories,
        );

        if self.should_validate_pruned_directory(&state) {
            let pruned = Self::collect_files(
                state.pruned_directories_under(relative),
                relative,
                &self.mount_point,
                recursive,
                include_files,
                include_directories,
            );
            self.validate_directory_search(&results, &pruned, path);
        }

        results.into_iter().collect()
    }

    fn should_validate_pruned_directory(&self, state: &DirectoryState) -> bool {
        self.options.validate_pruning && state.will_prune && !state.needs_legacy_pruning
    }

    fn collect_files(
        listing: Vec<(String, &PakDirectory)>,
        relative: &str,
        mount_point: &str,
        recursive: bool,
        include_files: bool,
        include_directories: bool,
    ) -> BTreeSet<String> {
        let prefix = if relative == "/" { "" } else { relative };
        let mut results = BTreeSet::new();
        for (directory_name, directory) in listing {
            if directory_name == relative {
                if include_files {
                    let full_directory = pak_path_combine(mount_point, &directory_name);
                    for leaf in directory.keys() {
                        results.insert(pak_path_combine(&full_directory, leaf));
                    }
                }
                continue;
            }
            let remainder = &directory_name[prefix.len()..];
            let immediate = remainder.matches('/').count() == 1;
            if !recursive && !immediate {
                continue;
            }
            if include_directories {
                results.insert(pak_path_combine(mount_point, &directory_name));
            }
            if include_files && recursive {
                let full_directory = pak_path_combine(mount_point, &directory_name);
                for leaf in directory.keys() {
                    results.insert(pak_path_combine(&full_directory, leaf));
                }
            }
        }
        results
    }

    /// Report any disagreement between the full and pruned directory views,
    /// ignoring paths matched by the configured ignore wildcards. The pruned
    /// view must always be a subset of the full one.
    fn validate_directory_search(
        &self,
        full: &BTreeSet<String>,
        pruned: &BTreeSet<String>,
        query: &str,
    ) {
        let ignored: Vec<glob::Pattern> = self
            .options
            .index_validation_ignore
            .iter()
            .filter_map(|wildcard| glob::Pattern::new(wildcard).ok())
            .collect();
        let not_ignored =
            |path: &&String| !ignored.iter().any(|pattern| pattern.matches(path));
        let missing_from_pruned: Vec<&String> =
            full.difference(pruned).filter(not_ignored).collect();
        let missing_from_full: Vec<&String> =
            pruned.difference(full).filter(not_ignored).collect();
        if missing_from_pruned.is_empty() && missing_from_full.is_empty() {
            return;
        }
        tracing::error!(
            filename = %self.filename,
            query,
            "directory search found a different list in the full directory index than in \
             the pruned directory index; change the calling code or add the paths to the \
             validation ignore list"
        );
        for missing in missing_from_pruned {
            tracing::warn!(filename = %self.filename, path = %missing, "missing from pruned directory index");
        }
        if !missing_from_full.is_empty() {
            tracing::error!(
                filename = %self.filename,
                "paths in the pruned directory index are missing from the full index; the \
                 pruned index must be a subset of the full index"
            );
            for missing in missing_from_full {
                tracing::warn!(filename = %self.filename, path = %missing, "missing from full directory index");
            }
        }
    }

    /// Apply deferred pruning: collapse the directory index down to the
    /// configured wildcards, atomically for concurrent readers. In
    /// validation mode both views are retained and cross-checked on every
    /// query instead of swapping.
    pub fn optimize_memory_usage(&self) {
        let mut state = self.write_state();
        if !state.will_prune {
            return;
        }

        if state.needs_legacy_pruning {
            let rules = PruneRules::from_options(&self.options);
            let DirectoryState {
                index,
                tree,
                pruned_index,
                pruned_tree,
                ..
            } = &mut *state;
            if let Some(full) = index {
                prune_directory_index(
                    full,
                    Some(pruned_index.get_or_insert_with(Default::default)),
                    &self.mount_point,
                    &rules,
                );
            }
            if let Some(full) = tree {
                prune_directory_tree(
                    full,
                    Some(pruned_tree.get_or_insert_with(Default::default)),
                    &self.mount_point,
                    &rules,
                );
            }
            state.needs_legacy_pruning = false;
        }

        if self.options.validate_pruning {
            // keep both views; queries cross-check until validation is over
            return;
        }

        state.index = state.pruned_index.take();
        state.tree = state.pruned_tree.take();
        state.has_full = false;
        state.will_prune = false;
    }

    /// Debug-only insertion of an extra entry. The exclusive borrow keeps
    /// this from racing concurrent readers.
    pub fn add_special_file(&mut self, entry: Entry, filename: &str) -> Result<()> {
        let location = if entry.is_delete_record() {
            EntryLocation::Invalid
        } else {
            let offset = self.store.encoded.len() as u64;
            let location = if entry.encode(&mut self.store.encoded, &self.info)? {
                EntryLocation::Encoded(offset)
            } else {
                self.store.files.push(entry);
                EntryLocation::Listed(self.store.files.len() - 1)
            };
            self.num_entries += 1;
            location
        };

        let state = self.directory.get_mut().unwrap_or_else(|e| e.into_inner());
        add_entry_to_index(
            filename,
            location,
            &self.mount_point,
            self.path_hash_seed,
            IndexSinks {
                directory: state.index.as_mut(),
                tree: state.tree.as_mut(),
                path_hash: if self.has_path_hash_index {
                    self.path_hash_index.as_mut()
                } else {
                    None
                },
                collisions: None,
            },
            self.info.version,
        )
    }

    /// Borrow a pooled archive reader for one synchronous operation.
    pub fn shared_reader(&self) -> Result<SharedReader<'_>> {
        self.readers.shared_reader()
    }

    /// Age out idle pooled readers; non-blocking.
    pub fn release_old_readers(&self, max_age: std::time::Duration) {
        self.readers.release_old_readers(max_age);
    }

    /// Rebuild pooled readers against a new byte provider.
    pub fn recreate_readers(&self, factory: Arc<dyn ReaderFactory>) -> bool {
        self.readers.recreate_readers(factory)
    }

    /// Register a delegate for signature failures surfaced by signed reads.
    pub fn on_signature_failure(
        &self,
        handler: Arc<dyn Fn(&SignatureFailure) + Send + Sync>,
    ) -> u64 {
        self.readers.handlers().register(handler)
    }

    pub fn remove_signature_failure_handler(&self, id: u64) {
        self.readers.handlers().unregister(id);
    }

    /// Integrity scan. Signed archives touch one byte per signing chunk and
    /// count verifier failures; unsigned archives hash every payload against
    /// its in-place record and compare that record against the index.
    pub fn check(&self) -> Result<bool> {
        tracing::info!(
            filename = %self.filename,
            "checking archive; this may take a while"
        );
        let mut error_count = 0usize;
        let mut file_count = 0usize;

        if self.readers.is_signed() {
            let failures = Arc::new(AtomicUsize::new(0));
            let counter = failures.clone();
            let handler_id = self
                .readers
                .handlers()
                .register(Arc::new(move |_failure: &SignatureFailure| {
                    counter.fetch_add(1, Ordering::Relaxed);
                }));
            {
                let mut reader = self.shared_reader()?;
                let chunk_size = self
                    .readers
                    .verifier()
                    .map(|verifier| verifier.chunk_size())
                    .unwrap_or(self.total_size as u64);
                // one byte per signing chunk pulls the whole chunk through
                // the verifier
                let mut position = 0u64;
                while (position as i64) < self.total_size {
                    reader.seek(SeekFrom::Start(position))?;
                    let mut byte = [0u8; 1];
                    std::io::Read::read_exact(&mut reader, &mut byte)?;
                    position += chunk_size;
                }
            }
            self.readers.handlers().unregister(handler_id);
            error_count += failures.load(Ordering::Relaxed);
        } else {
            let mut reader = self.shared_reader()?;
            for (filename, location) in self.entries(true, self.has_path_hash_index) {
                let name = || {
                    filename
                        .clone()
                        .unwrap_or_else(|| format!("file at {location:?}"))
                };
                let Some(index_entry) = self.entry(location)? else {
                    tracing::trace!(entry = %name(), "deleted");
                    continue;
                };
                file_count += 1;
                reader.seek(SeekFrom::Start(index_entry.offset))?;
                let payload_entry = Entry::read(&mut reader, self.info.version)?;
                if !payload_entry.index_data_equals(&index_entry) {
                    tracing::error!(
                        filename = %self.filename,
                        entry = %name(),
                        "index entry does not match payload entry"
                    );
                    error_count += 1;
                }
                let payload = ser::read_bytes(&mut reader, index_entry.compressed as usize)?;
                let computed = crate::sha1(&payload);
                if computed != payload_entry.hash {
                    tracing::error!(
                        filename = %self.filename,
                        entry = %name(),
                        stored_hash = %payload_entry.hash,
                        computed_hash = %computed,
                        "payload hash mismatch"
                    );
                    error_count += 1;
                } else {
                    tracing::trace!(entry = %name(), "ok");
                }
            }
        }

        if error_count == 0 {
            tracing::info!(
                filename = %self.filename,
                files_checked = file_count,
                "archive healthy"
            );
        } else {
            tracing::warn!(
                filename = %self.filename,
                errors = error_count,
                files_checked = file_count,
                "archive corrupted"
            );
        }
        Ok(error_count == 0)
    }
}

enum IterBacking<'a> {
    PathHash(std::collections::hash_map::Iter<'a, u64, EntryLocation>),
    Directory {
        guard: RwLockReadGuard<'a, DirectoryState>,
        dirs: Vec<String>,
        dir_position: usize,
        file_cursor: Option<String>,
    },
    Done,
}

/// Finite, non-restartable walk over `(filename?, location)` pairs.
pub struct EntryIterator<'a> {
    include_deleted: bool,
    backing: IterBacking<'a>,
}

impl Iterator for EntryIterator<'_> {
    type Item = (Option<String>, EntryLocation);

    fn next(&mut self) -> Option<Self::Item> {
        let include_deleted = self.include_deleted;
        match &mut self.backing {
            IterBacking::Done => None,
            IterBacking::PathHash(iter) => {
                for (_, location) in iter.by_ref() {
                    if !include_deleted && location.is_invalid() {
                        continue;
                    }
                    return Some((None, *location));
                }
                None
            }
            IterBacking::Directory {
                guard,
                dirs,
                dir_position,
                file_cursor,
            } => {
                loop {
                    let directory_name = dirs.get(*dir_position)?;
                    let Some(directory) = guard.directory(directory_name) else {
                        *dir_position += 1;
                        *file_cursor = None;
                        continue;
                    };
                    let next = match file_cursor.as_deref() {
                        None => directory.iter().next(),
                        Some(previous) => directory
                            .range::<str, _>((Bound::Excluded(previous), Bound::Unbounded))
                            .next(),
                    };
                    match next {
                        Some((leaf, location)) => {
                            *file_cursor = Some(leaf.clone());
                            if !include_deleted && location.is_invalid() {
                                continue;
                            }
                            return Some((
                                Some(pak_path_combine(directory_name, leaf)),
                                *location,
                            ));
                        }
                        None => {
                            *dir_position += 1;
                            *file_cursor = None;
                        }
                    }
                }
            }
        }
    }
}
