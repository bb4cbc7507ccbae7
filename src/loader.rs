use crate::{
    config::IndexOptions,
    crypto::KeyStore,
    entry::Entry,
    index::{
        add_entry_to_index, DirectoryIndex, EntryLocation, IndexSinks, PakDirectory,
        PathHashIndex,
    },
    path::{make_directory_from_path, path_hash_seed},
    ser,
    tree::DirectoryTree,
    Error, Info, Result, Version, VersionMajor,
};
use byteorder::{ReadBytesExt, LE};
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};

const MAX_MOUNT_POINT_LEN: usize = 65535;

/// Everything the loader materializes out of an archive's indexes.
pub(crate) struct LoadedIndex {
    pub mount_point: String,
    pub num_entries: i32,
    pub path_hash_seed: u64,
    pub encoded: Vec<u8>,
    pub files: Vec<Entry>,
    pub path_hash_index: Option<PathHashIndex>,
    pub directory_index: Option<DirectoryIndex>,
    pub directory_tree: Option<DirectoryTree>,
    pub pruned_directory_index: Option<DirectoryIndex>,
    pub pruned_directory_tree: Option<DirectoryTree>,
    pub has_path_hash_index: bool,
    pub has_full_directory_index: bool,
    pub will_prune_directory_index: bool,
    pub needs_legacy_pruning: bool,
}

impl LoadedIndex {
    fn empty() -> Self {
        LoadedIndex {
            mount_point: String::new(),
            num_entries: 0,
            path_hash_seed: 0,
            encoded: vec![],
            files: vec![],
            path_hash_index: None,
            directory_index: None,
            directory_tree: None,
            pruned_directory_index: None,
            pruned_directory_tree: None,
            has_path_hash_index: false,
            has_full_directory_index: false,
            will_prune_directory_index: false,
            needs_legacy_pruning: false,
        }
    }
}

/// Find the trailer by trying every known version from latest down to the
/// first: the trailer grew over time, so its distance from the end of the
/// file identifies the version, confirmed by the magic.
pub(crate) fn negotiate_trailer<R: Read + Seek>(reader: &mut R, total_size: i64) -> Result<Info> {
    use std::fmt::Write;
    let mut log = "\n".to_owned();

    for version in Version::iter() {
        let trailer_position = total_size - version.size();
        if trailer_position < 0 {
            continue;
        }
        reader.seek(SeekFrom::Start(trailer_position as u64))?;
        match Info::read(reader, version) {
            Ok(info) => return Ok(info),
            Err(err) => {
                let _ = writeln!(log, "trying version {} failed: {}", version, err);
            }
        }
    }
    Err(Error::TrailerNotFound(log))
}

fn check_bounds(kind: &'static str, offset: i64, size: i64, total_size: i64) -> Result<()> {
    let in_bounds = offset >= 0
        && size >= 0
        && size <= i32::MAX as i64
        && offset
            .checked_add(size)
            .is_some_and(|end| end <= total_size);
    if in_bounds {
        Ok(())
    } else {
        Err(Error::IndexOutOfBounds {
            kind,
            offset,
            size,
            total: total_size,
        })
    }
}

/// Decrypt (when the trailer says so) and SHA-1-validate one index blob.
fn decrypt_and_validate(
    keys: &dyn KeyStore,
    info: &Info,
    data: &mut [u8],
    stored: crate::Hash,
    kind: &'static str,
    filename: &str,
    total_size: i64,
) -> Result<()> {
    if info.encrypted_index {
        keys.decrypt(info.encryption_key_guid, data)?;
    }
    let computed = crate::sha1(data);
    if computed != stored {
        tracing::error!(
            filename,
            kind,
            encrypted = info.encrypted_index,
            total_size,
            index_offset = info.index_offset,
            index_size = info.index_size,
            stored_hash = %stored,
            computed_hash = %computed,
            "corrupt archive index detected"
        );
        return Err(Error::HashMismatch {
            kind,
            stored,
            computed,
        });
    }
    Ok(())
}

fn read_block<R: Read + Seek>(reader: &mut R, offset: i64, size: i64) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset as u64))?;
    ser::read_bytes(reader, size as usize)
}

fn read_mount_point<R: Read>(reader: &mut R) -> Result<String> {
    let mut mount_point = ser::read_string(reader)?;
    if mount_point.len() > MAX_MOUNT_POINT_LEN {
        tracing::error!("corrupt index data: mount point path is longer than 65535 characters");
        return Err(Error::MountPointTooLong(mount_point.len()));
    }
    make_directory_from_path(&mut mount_point);
    Ok(mount_point)
}

fn read_count<R: Read>(reader: &mut R, kind: &'static str) -> Result<i32> {
    let count = reader.read_i32::<LE>()?;
    if count < 0 {
        tracing::error!(kind, count, "corrupt index data: negative count");
        return Err(Error::NegativeCount { kind, count });
    }
    Ok(count)
}

/// Parse one serialized directory listing into the configured backends. Leaf
/// names are length-prefixed UTF-8 for current archives; older archives may
/// store them wide and are transcoded by the string reader.
fn read_directory_listing<R: Read>(
    reader: &mut R,
    store_map: bool,
    store_tree: bool,
) -> Result<(Option<DirectoryIndex>, Option<DirectoryTree>)> {
    let num_directories = read_count(reader, "directories")?;
    let mut map = store_map.then(DirectoryIndex::new);
    let mut tree = store_tree.then(DirectoryTree::new);
    for _ in 0..num_directories {
        let directory_name = ser::read_string(reader)?;
        let num_files = read_count(reader, "files")?;
        let mut files = PakDirectory::new();
        for _ in 0..num_files {
            let leaf = ser::read_string(reader)?;
            let location = EntryLocation::read(reader)?;
            files.insert(leaf, location);
        }
        if let Some(tree) = &mut tree {
            *tree.find_or_add(&directory_name) = files.clone();
        }
        if let Some(map) = &mut map {
            map.insert(directory_name, files);
        }
    }
    Ok((map, tree))
}

/// Load the archive's indexes, retrying once on a hash mismatch to survive a
/// transient read tear. Structural corruption is immediately fatal.
pub(crate) fn load_index<R: Read + Seek>(
    reader: &mut R,
    total_size: i64,
    info: &Info,
    filename: &str,
    options: &IndexOptions,
    keys: &dyn KeyStore,
) -> Result<LoadedIndex> {
    let modern = info.version.version_major() >= VersionMajor::PathHashIndex;
    let attempt = |reader: &mut R| {
        if modern {
            load_modern(reader, total_size, info, filename, options, keys)
        } else {
            load_legacy(reader, total_size, info, filename, options, keys)
        }
    };

    match attempt(reader) {
        Err(Error::HashMismatch { .. }) => {
            tracing::warn!(filename, "index load failed, retrying once");
            match attempt(reader) {
                Err(err @ Error::HashMismatch { .. }) => {
                    tracing::error!(filename, "corrupt index detected on archive");
                    Err(err)
                }
                other => other,
            }
        }
        other => other,
    }
}

fn load_modern<R: Read + Seek>(
    reader: &mut R,
    total_size: i64,
    info: &Info,
    filename: &str,
    options: &IndexOptions,
    keys: &dyn KeyStore,
) -> Result<LoadedIndex> {
    check_bounds("primary index", info.index_offset, info.index_size, total_size)?;
    let mut primary_data = read_block(reader, info.index_offset, info.index_size)?;
    decrypt_and_validate(
        keys,
        info,
        &mut primary_data,
        info.index_hash,
        "primary index",
        filename,
        total_size,
    )?;

    let mut primary = io::Cursor::new(primary_data);
    let mut loaded = LoadedIndex::empty();
    loaded.mount_point = read_mount_point(&mut primary)?;
    loaded.num_entries = read_count(&mut primary, "entries")?;
    loaded.path_hash_seed = primary.read_u64::<LE>()?;

    let mut has_path_hash_index = primary.read_u32::<LE>()? != 0;
    let mut path_hash_offset = -1;
    let mut path_hash_size = 0;
    let mut path_hash_hash = crate::Hash::default();
    if has_path_hash_index {
        path_hash_offset = primary.read_i64::<LE>()?;
        path_hash_size = primary.read_i64::<LE>()?;
        path_hash_hash = crate::Hash::read(&mut primary)?;
        has_path_hash_index = path_hash_offset != -1;
    }

    let mut has_full_directory_index = primary.read_u32::<LE>()? != 0;
    let mut full_directory_offset = -1;
    let mut full_directory_size = 0;
    let mut full_directory_hash = crate::Hash::default();
    if has_full_directory_index {
        full_directory_offset = primary.read_i64::<LE>()?;
        full_directory_size = primary.read_i64::<LE>()?;
        full_directory_hash = crate::Hash::read(&mut primary)?;
        has_full_directory_index = full_directory_offset != -1;
    }

    let encoded_size = primary.read_u32::<LE>()? as usize;
    loaded.encoded = ser::read_bytes(&mut primary, encoded_size)?;

    let files_count = read_count(&mut primary, "entry records")?;
    let mut files = Vec::with_capacity(files_count as usize);
    for _ in 0..files_count {
        files.push(Entry::read(&mut primary, info.version)?);
    }
    loaded.files = files;

    // Decide which secondary index(es) to load.
    let (will_use_full, will_use_path_hash, read_full_directory) =
        if has_path_hash_index && has_full_directory_index {
            let want_full = options.keep_full_directory
                || options.validate_pruning
                || options.delay_pruning;
            (options.keep_full_directory, !options.keep_full_directory, want_full)
        } else if has_path_hash_index {
            (false, true, false)
        } else if has_full_directory_index {
            // Synthesizing a path-hash index at runtime is not supported, so
            // the full directory index is the only option.
            (true, false, true)
        } else {
            tracing::error!(filename, "corrupt primary index: no secondary index present");
            return Err(Error::MissingIndex);
        };

    let store_map = options.directory_backend.stores_map();
    let store_tree = options.directory_backend.stores_tree();

    // The path-hash blob carries the path-hash map followed by a pruned
    // directory listing, so path-hash-only consumers still get a minimal
    // directory index.
    let mut path_hash_reader = None;
    if will_use_path_hash {
        check_bounds("path hash index", path_hash_offset, path_hash_size, total_size)?;
        let mut data = read_block(reader, path_hash_offset, path_hash_size)?;
        decrypt_and_validate(
            keys,
            info,
            &mut data,
            path_hash_hash,
            "path hash index",
            filename,
            total_size,
        )?;
        let mut cursor = io::Cursor::new(data);
        let count = read_count(&mut cursor, "path hashes")?;
        let mut path_hash_index = PathHashIndex::with_capacity(count as usize);
        for _ in 0..count {
            let hash = cursor.read_u64::<LE>()?;
            let location = EntryLocation::read(&mut cursor)?;
            path_hash_index.insert(hash, location);
        }
        loaded.path_hash_index = Some(path_hash_index);
        loaded.has_path_hash_index = true;
        path_hash_reader = Some(cursor);
    }

    if !read_full_directory {
        debug_assert!(will_use_path_hash);
        let cursor = path_hash_reader
            .as_mut()
            .ok_or(Error::Other("path hash blob missing pruned directory"))?;
        let (map, tree) = read_directory_listing(cursor, store_map, store_tree)?;
        loaded.directory_index = map;
        loaded.directory_tree = tree;
        loaded.has_full_directory_index = false;
        loaded.will_prune_directory_index = false;
    } else {
        check_bounds(
            "full directory index",
            full_directory_offset,
            full_directory_size,
            total_size,
        )?;
        let mut data = read_block(reader, full_directory_offset, full_directory_size)?;
        decrypt_and_validate(
            keys,
            info,
            &mut data,
            full_directory_hash,
            "full directory index",
            filename,
            total_size,
        )?;
        let mut cursor = io::Cursor::new(data);
        let (map, tree) = read_directory_listing(&mut cursor, store_map, store_tree)?;
        loaded.directory_index = map;
        loaded.directory_tree = tree;
        loaded.has_full_directory_index = true;

        if will_use_full {
            loaded.will_prune_directory_index = false;
        } else {
            // Park the pruned listing for validation and the later swap.
            debug_assert!(will_use_path_hash);
            let cursor = path_hash_reader
                .as_mut()
                .ok_or(Error::Other("path hash blob missing pruned directory"))?;
            let (map, tree) = read_directory_listing(cursor, store_map, store_tree)?;
            loaded.pruned_directory_index = map;
            loaded.pruned_directory_tree = tree;
            loaded.will_prune_directory_index = true;
        }
    }

    tracing::debug!(
        filename,
        primary_index_size = info.index_size,
        path_hash_index_size = path_hash_size,
        full_directory_index_size = full_directory_size,
        "archive index loaded"
    );
    debug_assert!(loaded.has_full_directory_index || loaded.has_path_hash_index);
    Ok(loaded)
}

/// Archives predating the path-hash format carry a single index blob of
/// `(filename, entry)` pairs. Entries are bit-encoded on the fly; a
/// path-hash index is synthesized only when pruning will need it.
fn load_legacy<R: Read + Seek>(
    reader: &mut R,
    total_size: i64,
    info: &Info,
    filename: &str,
    options: &IndexOptions,
    keys: &dyn KeyStore,
) -> Result<LoadedIndex> {
    check_bounds("index", info.index_offset, info.index_size, total_size)?;
    let mut index_data = read_block(reader, info.index_offset, info.index_size)?;
    decrypt_and_validate(
        keys,
        info,
        &mut index_data,
        info.index_hash,
        "index",
        filename,
        total_size,
    )?;

    let mut index = io::Cursor::new(index_data);
    let mut loaded = LoadedIndex::empty();
    loaded.mount_point = read_mount_point(&mut index)?;
    loaded.num_entries = read_count(&mut index, "entries")?;
    loaded.path_hash_seed = path_hash_seed(filename);

    let create_path_hash = !options.keep_full_directory;
    let store_map = options.directory_backend.stores_map();
    let store_tree = options.directory_backend.stores_tree();

    let mut directory_index = store_map.then(DirectoryIndex::new);
    let mut directory_tree = store_tree.then(DirectoryTree::new);
    let mut path_hash_index = create_path_hash.then(PathHashIndex::new);
    let mut collisions: HashMap<u64, String> = HashMap::new();

    let mut encoded_count = 0usize;
    let mut deleted_count = 0usize;
    for _ in 0..loaded.num_entries {
        let entry_filename = ser::read_string(&mut index)?;
        let entry = Entry::read(&mut index, info.version)?;
        let location = if entry.is_delete_record() {
            deleted_count += 1;
            EntryLocation::Invalid
        } else {
            let offset = loaded.encoded.len() as u64;
            if entry.encode(&mut loaded.encoded, info)? {
                encoded_count += 1;
                EntryLocation::Encoded(offset)
            } else {
                // index records have no usable payload hash
                let mut stored = entry;
                stored.hash = crate::Hash::default();
                stored.verified = true;
                loaded.files.push(stored);
                EntryLocation::Listed(loaded.files.len() - 1)
            }
        };
        add_entry_to_index(
            &entry_filename,
            location,
            &loaded.mount_point,
            loaded.path_hash_seed,
            IndexSinks {
                directory: directory_index.as_mut(),
                tree: directory_tree.as_mut(),
                path_hash: path_hash_index.as_mut(),
                collisions: Some(&mut collisions),
            },
            info.version,
        )?;
    }

    if encoded_count + loaded.files.len() + deleted_count != loaded.num_entries as usize {
        return Err(Error::Other("entry count does not add up after encoding"));
    }

    loaded.directory_index = directory_index;
    loaded.directory_tree = directory_tree;
    loaded.path_hash_index = path_hash_index;
    loaded.has_path_hash_index = create_path_hash;
    loaded.has_full_directory_index = true;
    if !options.keep_full_directory {
        // Pruning wildcards may not be configured yet at mount time; the
        // swap happens in the explicit post-mount step.
        loaded.needs_legacy_pruning = true;
        loaded.will_prune_directory_index = true;
    }

    debug_assert!(loaded.has_full_directory_index || loaded.has_path_hash_index);
    Ok(loaded)
}
