#[derive(thiserror::Error, Debug)]
pub enum Error {
    // dependency errors
    #[error("enum conversion: {0}")]
    Strum(#[from] strum::ParseError),
    #[error("key hash is an incorrect length")]
    Aes,
    // std errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("utf8 conversion: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("utf16 conversion: {0}")]
    Utf16(#[from] std::string::FromUtf16Error),
    // crate errors
    #[error("got {0}, which is not a boolean")]
    Bool(u8),
    #[error("found magic of {0:#x} instead of {:#x}", super::MAGIC)]
    Magic(u32),
    #[error("used version {used} but archive is version {version}")]
    Version {
        used: super::VersionMajor,
        version: super::VersionMajor,
    },
    #[error("no recognized trailer at any known version: {0}")]
    TrailerNotFound(String),
    #[error("archive index is encrypted but no key was provided")]
    Encrypted,
    #[error("{kind} offset {offset} size {size} out of bounds for archive of {total} bytes")]
    IndexOutOfBounds {
        kind: &'static str,
        offset: i64,
        size: i64,
        total: i64,
    },
    #[error("corrupt index data: mount point path is longer than 65535 characters ({0})")]
    MountPointTooLong(usize),
    #[error("corrupt index data: negative {kind} count {count}")]
    NegativeCount { kind: &'static str, count: i32 },
    #[error("{kind} hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch {
        kind: &'static str,
        stored: crate::Hash,
        computed: crate::Hash,
    },
    #[error("path hash collision {hash:#018x} between \"{first}\" and \"{second}\"")]
    PathHashCollision {
        hash: u64,
        first: String,
        second: String,
    },
    #[error("primary index carries neither a path-hash index nor a full directory index")]
    MissingIndex,
    #[error("{0}")]
    Other(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
