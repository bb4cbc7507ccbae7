use crate::{Version, VersionMajor};

/// Archive paths are forward-slash delimited and already normalized by the
/// producer. Directories carry a trailing `/`; the root directory is `"/"`.

pub fn make_directory_from_path(path: &mut String) {
    if !path.ends_with('/') {
        path.push('/');
    }
}

pub fn is_directory_format(path: &str) -> bool {
    path.ends_with('/')
}

/// Join a directory-form parent with a child. `"/"` is the relative path of
/// the mount directory itself and maps to the empty string when joining.
pub fn pak_path_combine(parent: &str, child: &str) -> String {
    debug_assert!(is_directory_format(parent));
    if parent.len() == 1 {
        child.to_string()
    } else if child == "/" {
        parent.to_string()
    } else {
        debug_assert!(child.is_empty() || !child.starts_with('/'));
        let mut result = String::with_capacity(parent.len() + child.len());
        result.push_str(parent);
        result.push_str(child);
        result
    }
}

/// Split a path into its parent directory (keeping the trailing `/`) and its
/// last component. The root directory has no parent and returns `None`; a
/// bare leaf is a direct child of the root.
pub fn split_path_child(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() || path == "/" {
        return None;
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(slash) => Some(trimmed.split_at(slash + 1)),
        None => Some(("/", trimmed)),
    }
}

/// Rebase an index filename to its mount-relative form. Filenames that are
/// already relative pass through unchanged.
pub fn rebase_to_mount<'a>(filename: &'a str, mount: &str) -> Option<&'a str> {
    if let Some(relative) = filename.strip_prefix(mount) {
        Some(relative)
    } else if !filename.starts_with('/') {
        Some(filename)
    } else {
        None
    }
}

/// Strict form used by lookups: the path must live under the mount point.
pub fn relative_from_mount<'a>(full_path: &'a str, mount: &str) -> Option<&'a str> {
    full_path.strip_prefix(mount)
}

const FNV64_BASIS: u64 = 0xcbf29ce484222325;
const FNV64_PRIME: u64 = 0x00000100000001b3;

fn fnv1a_64(bytes: impl IntoIterator<Item = u8>, basis: u64, prime: u64) -> u64 {
    let mut state = basis;
    for byte in bytes {
        state ^= u64::from(byte);
        state = state.wrapping_mul(prime);
    }
    state
}

/// Hash a mount-relative path the way the path-hash index stores it: the
/// lowercased path is encoded as UTF-16LE and run through seeded FNV-1a-64.
///
/// Archives written before the constant-swap fix seeded with the prime and
/// multiplied by the basis; their stored hashes must keep resolving, so the
/// swapped form is kept for pre-fix versions.
pub fn hash_path(relative_path: &str, seed: u64, version: Version) -> u64 {
    let lowered = relative_path.to_lowercase();
    let wide = lowered.encode_utf16().flat_map(u16::to_le_bytes);
    if version.version_major() >= VersionMajor::Fnv64BugFix {
        fnv1a_64(wide, FNV64_BASIS.wrapping_add(seed), FNV64_PRIME)
    } else {
        fnv1a_64(wide, FNV64_PRIME.wrapping_add(seed), FNV64_BASIS)
    }
}

/// Seed stored in the primary index, derived from the archive's own filename
/// to keep hashes distinct across archives.
pub fn path_hash_seed(pak_filename: &str) -> u64 {
    crc32c::crc32c(pak_filename.to_lowercase().as_bytes()) as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_parent_and_leaf() {
        assert_eq!(
            split_path_child("textures/ui/icon.dds"),
            Some(("textures/ui/", "icon.dds"))
        );
        // splitting a directory-form path peels its last component
        assert_eq!(split_path_child("textures/ui/"), Some(("textures/", "ui")));
        assert_eq!(split_path_child("readme.md"), Some(("/", "readme.md")));
        assert_eq!(split_path_child("/"), None);
        assert_eq!(split_path_child(""), None);
    }

    #[test]
    fn test_split_preserves_empty_components() {
        // doubled separators are not collapsed
        assert_eq!(split_path_child("maps//m1.bin"), Some(("maps//", "m1.bin")));
        assert_eq!(split_path_child("maps//"), Some(("maps/", "")));
    }

    #[test]
    fn test_split_walks_to_root() {
        // repeated splitting is how ancestor chains are built
        let mut current = "a/b/c/";
        let mut seen = vec![];
        while let Some((parent, _)) = split_path_child(current) {
            seen.push(parent);
            current = parent;
        }
        assert_eq!(seen, vec!["a/b/", "a/", "/"]);
    }

    #[test]
    fn test_pak_path_combine() {
        assert_eq!(pak_path_combine("/", "a/b.txt"), "a/b.txt");
        assert_eq!(pak_path_combine("../mount/root/", "/"), "../mount/root/");
        assert_eq!(pak_path_combine("../mount/root/", "a/"), "../mount/root/a/");
        assert_eq!(pak_path_combine("a/", "b"), "a/b");
    }

    #[test]
    fn test_rebase() {
        assert_eq!(
            rebase_to_mount("../mount/root/a/b.txt", "../mount/root/"),
            Some("a/b.txt")
        );
        assert_eq!(rebase_to_mount("a/b.txt", "../mount/root/"), Some("a/b.txt"));
        assert_eq!(rebase_to_mount("/other/a.txt", "../mount/root/"), None);
        assert_eq!(relative_from_mount("/a.bin", "/"), Some("a.bin"));
        assert_eq!(relative_from_mount("/a.bin", "/keep/"), None);
    }

    #[test]
    fn test_hash_path_empty_is_seeded_basis() {
        // no bytes are mixed in, so the result is the basis plus the seed
        assert_eq!(hash_path("", 0, Version::V11), 0xcbf29ce484222325);
        assert_eq!(hash_path("", 7, Version::V11), 0xcbf29ce484222325 + 7);
        assert_eq!(hash_path("", 0, Version::V10), 0x00000100000001b3);
    }

    #[test]
    fn test_hash_path_lowercases() {
        assert_eq!(
            hash_path("A/B.BIN", 42, Version::V11),
            hash_path("a/b.bin", 42, Version::V11)
        );
    }

    #[test]
    fn test_hash_path_variants_disagree() {
        // the legacy constant swap must produce different hashes
        assert_ne!(
            hash_path("a.bin", 0, Version::V10),
            hash_path("a.bin", 0, Version::V11)
        );
        // and the seed must matter
        assert_ne!(
            hash_path("a.bin", 0, Version::V11),
            hash_path("a.bin", 1, Version::V11)
        );
    }

    #[test]
    fn test_path_hash_seed_case_insensitive() {
        assert_eq!(path_hash_seed("Game.pak"), path_hash_seed("game.pak"));
        assert_ne!(path_hash_seed("game.pak"), path_hash_seed("other.pak"));
    }
}
