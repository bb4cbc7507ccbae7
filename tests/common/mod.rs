#![allow(dead_code)]

use byteorder::{WriteBytesExt, LE};
use paklode::{
    ChunkSignatureVerifier, ChunkSignatureVerifierSource, Entry, EntryLocation, EntryRecord,
    Hash, Info, PakStream, ReaderFactory, Version, VersionMajor, MAGIC,
};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

pub const MOUNT: &str = "../mount/root/";
pub const FIXTURE_NAME: &str = "fixture.pak";

pub static AES_KEY: &str = "lNJbw660IOC+kU7cnVQ1oeqrXyhk4J6UAZrCBbcnp94=";

pub fn test_key() -> aes::Aes256 {
    use aes::cipher::KeyInit;
    use base64::{engine::general_purpose, Engine as _};
    let bytes = general_purpose::STANDARD.decode(AES_KEY).unwrap();
    aes::Aes256::new_from_slice(&bytes).unwrap()
}

fn sha1(data: &[u8]) -> Hash {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    buf.write_u32::<LE>(value.len() as u32 + 1).unwrap();
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
}

fn pad16(buf: &mut Vec<u8>) {
    let pad = (16 - buf.len() % 16) % 16;
    buf.resize(buf.len() + pad, 0);
}

fn encrypt(key: &aes::Aes256, data: &mut [u8]) {
    use aes::cipher::BlockEncrypt;
    for chunk in data.chunks_mut(16) {
        if chunk.len() == 16 {
            key.encrypt_block(aes::Block::from_mut_slice(chunk));
        }
    }
}

type Listing = BTreeMap<String, BTreeMap<String, EntryLocation>>;

/// Group locations into a directory listing with every parent directory
/// present, the way producers serialize directory indexes.
fn directory_listing(locations: &BTreeMap<String, EntryLocation>) -> Listing {
    let mut listing = Listing::new();
    for (path, location) in locations {
        let mut current = path.as_str();
        while let Some((parent, _)) = paklode::split_path_child(current) {
            current = parent;
            listing.entry(current.to_string()).or_default();
        }
        let (directory, leaf) = paklode::split_path_child(path).expect("non-root path");
        listing
            .entry(directory.to_string())
            .or_default()
            .insert(leaf.to_string(), *location);
    }
    listing
}

fn write_listing(buf: &mut Vec<u8>, listing: &Listing) {
    buf.write_u32::<LE>(listing.len() as u32).unwrap();
    for (directory, files) in listing {
        write_string(buf, directory);
        buf.write_u32::<LE>(files.len() as u32).unwrap();
        for (leaf, location) in files {
            write_string(buf, leaf);
            location.write(buf).unwrap();
        }
    }
}

/// In-memory archive producer for read tests. Payloads are stored raw; the
/// interesting variation lives in the index: version era, encryption,
/// which secondary indexes exist, and the producer-pruned listing carried in
/// the path-hash blob.
pub struct Fixture {
    pub version: Version,
    pub mount_point: String,
    files: Vec<(String, Vec<u8>)>,
    deleted: Vec<String>,
    key: Option<aes::Aes256>,
    key_guid: u128,
    write_path_hash_index: bool,
    write_full_directory_index: bool,
    producer_keep_prefixes: Vec<String>,
}

impl Fixture {
    pub fn new(version: Version) -> Self {
        Fixture {
            version,
            mount_point: MOUNT.to_string(),
            files: vec![],
            deleted: vec![],
            key: None,
            key_guid: 0,
            write_path_hash_index: true,
            write_full_directory_index: true,
            producer_keep_prefixes: vec![],
        }
    }

    pub fn mount_point(mut self, mount_point: &str) -> Self {
        self.mount_point = mount_point.to_string();
        self
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.files.push((path.to_string(), data.to_vec()));
        self
    }

    pub fn deleted(mut self, path: &str) -> Self {
        self.deleted.push(path.to_string());
        self
    }

    pub fn encrypt_index(mut self, key: aes::Aes256, guid: u128) -> Self {
        self.key = Some(key);
        self.key_guid = guid;
        self
    }

    pub fn without_path_hash_index(mut self) -> Self {
        self.write_path_hash_index = false;
        self
    }

    pub fn without_full_directory_index(mut self) -> Self {
        self.write_full_directory_index = false;
        self
    }

    /// Emulate a producer that prunes the directory listing stored in the
    /// path-hash blob down to paths under the given prefixes.
    pub fn producer_keep(mut self, prefixes: &[&str]) -> Self {
        self.producer_keep_prefixes = prefixes.iter().map(|s| s.to_string()).collect();
        self
    }

    fn info(&self, index_offset: i64, index_size: i64, index_hash: Hash) -> Info {
        Info {
            encryption_key_guid: self.key_guid,
            encrypted_index: self.key.is_some(),
            magic: MAGIC,
            version: self.version,
            version_major: self.version.version_major(),
            index_offset,
            index_size,
            index_hash,
            frozen: false,
            compression: vec![None; 5],
        }
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![];
        let seed = paklode::path_hash_seed(FIXTURE_NAME);

        // payload section, each entry headed by its in-place record
        let mut entries: Vec<(String, Entry)> = vec![];
        let mut sorted = self.files.clone();
        sorted.sort();
        for (path, data) in &sorted {
            let offset = out.len() as u64;
            let entry = Entry {
                offset,
                compressed: data.len() as u64,
                uncompressed: data.len() as u64,
                compression_method_index: 0,
                timestamp: (self.version.version_major() == VersionMajor::Initial).then_some(0),
                hash: sha1(data),
                verified: false,
                blocks: vec![],
                encrypted: false,
                deleted: false,
                compression_block_size: 0,
            };
            entry
                .write(&mut out, self.version, EntryRecord::Payload)
                .unwrap();
            out.extend_from_slice(data);
            entries.push((path.clone(), entry));
        }

        if self.version.version_major() >= VersionMajor::PathHashIndex {
            self.build_modern(out, entries, seed)
        } else {
            self.build_legacy(out, entries)
        }
    }

    fn seal_index(&self, buf: &mut Vec<u8>) -> Hash {
        if self.key.is_some() {
            pad16(buf);
        }
        let hash = sha1(buf);
        if let Some(key) = &self.key {
            encrypt(key, buf);
        }
        hash
    }

    fn build_legacy(self, mut out: Vec<u8>, entries: Vec<(String, Entry)>) -> Vec<u8> {
        let index_offset = out.len() as i64;
        let mut index = vec![];
        write_string(&mut index, &self.mount_point);
        index
            .write_u32::<LE>((entries.len() + self.deleted.len()) as u32)
            .unwrap();
        for (path, entry) in &entries {
            write_string(&mut index, path);
            entry.write(&mut index, self.version, EntryRecord::Index).unwrap();
        }
        for path in &self.deleted {
            write_string(&mut index, path);
            Entry::delete_record()
                .write(&mut index, self.version, EntryRecord::Index)
                .unwrap();
        }

        let index_hash = self.seal_index(&mut index);
        let info = self.info(index_offset, index.len() as i64, index_hash);
        out.extend_from_slice(&index);
        info.write(&mut out).unwrap();
        out
    }

    fn build_modern(self, mut out: Vec<u8>, entries: Vec<(String, Entry)>, seed: u64) -> Vec<u8> {
        let info_probe = self.info(0, 0, Hash::default());

        let mut encoded = vec![];
        let mut locations: BTreeMap<String, EntryLocation> = BTreeMap::new();
        for (path, entry) in &entries {
            let offset = encoded.len() as u64;
            assert!(
                entry.encode(&mut encoded, &info_probe).unwrap(),
                "fixture entries must be encodable"
            );
            locations.insert(path.clone(), EntryLocation::Encoded(offset));
        }
        for path in &self.deleted {
            locations.insert(path.clone(), EntryLocation::Invalid);
        }

        // path-hash blob: the hash map plus a (possibly empty) pruned
        // directory listing
        let mut phi = vec![];
        if self.write_path_hash_index {
            phi.write_u32::<LE>(locations.len() as u32).unwrap();
            for (path, location) in &locations {
                phi.write_u64::<LE>(paklode::hash_path(path, seed, self.version))
                    .unwrap();
                location.write(&mut phi).unwrap();
            }
            let pruned: BTreeMap<String, EntryLocation> = if self.producer_keep_prefixes.is_empty()
            {
                BTreeMap::new()
            } else {
                locations
                    .iter()
                    .filter(|(path, _)| {
                        self.producer_keep_prefixes
                            .iter()
                            .any(|prefix| path.starts_with(prefix.as_str()))
                    })
                    .map(|(path, location)| (path.clone(), *location))
                    .collect()
            };
            write_listing(&mut phi, &directory_listing(&pruned));
        }

        let mut fdi = vec![];
        if self.write_full_directory_index {
            write_listing(&mut fdi, &directory_listing(&locations));
        }

        let phi_hash = self.seal_index(&mut phi);
        let fdi_hash = self.seal_index(&mut fdi);

        let index_offset = out.len() as i64;
        let mount_point_size = 4 + self.mount_point.len() as i64 + 1;
        let mut primary_size = mount_point_size + 4 + 8;
        primary_size += 4 + if self.write_path_hash_index { 8 + 8 + 20 } else { 0 };
        primary_size += 4 + if self.write_full_directory_index { 8 + 8 + 20 } else { 0 };
        primary_size += 4 + encoded.len() as i64 + 4;
        if self.key.is_some() {
            primary_size += (16 - primary_size % 16) % 16;
        }
        let phi_offset = index_offset + primary_size;
        let fdi_offset = phi_offset + phi.len() as i64;

        let mut primary = vec![];
        write_string(&mut primary, &self.mount_point);
        primary
            .write_u32::<LE>((entries.len() + self.deleted.len()) as u32)
            .unwrap();
        primary.write_u64::<LE>(seed).unwrap();
        primary
            .write_u32::<LE>(self.write_path_hash_index as u32)
            .unwrap();
        if self.write_path_hash_index {
            primary.write_i64::<LE>(phi_offset).unwrap();
            primary.write_i64::<LE>(phi.len() as i64).unwrap();
            primary.extend_from_slice(&phi_hash.0);
        }
        primary
            .write_u32::<LE>(self.write_full_directory_index as u32)
            .unwrap();
        if self.write_full_directory_index {
            primary.write_i64::<LE>(fdi_offset).unwrap();
            primary.write_i64::<LE>(fdi.len() as i64).unwrap();
            primary.extend_from_slice(&fdi_hash.0);
        }
        primary.write_u32::<LE>(encoded.len() as u32).unwrap();
        primary.extend_from_slice(&encoded);
        primary.write_u32::<LE>(0).unwrap();

        let index_hash = self.seal_index(&mut primary);
        assert_eq!(primary.len() as i64, primary_size);

        let info = self.info(index_offset, primary.len() as i64, index_hash);
        out.extend_from_slice(&primary);
        out.extend_from_slice(&phi);
        out.extend_from_slice(&fdi);
        info.write(&mut out).unwrap();
        out
    }
}

/// Reader factory over an in-memory archive image.
pub struct MemoryReaderFactory {
    data: Arc<Vec<u8>>,
}

impl MemoryReaderFactory {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(MemoryReaderFactory {
            data: Arc::new(data),
        })
    }
}

impl ReaderFactory for MemoryReaderFactory {
    fn open(&self) -> paklode::Result<Box<dyn PakStream>> {
        Ok(Box::new(io::Cursor::new(self.data.as_ref().clone())))
    }
}

/// Signature table captured over the pristine archive image.
pub struct TestSignatures {
    table: Arc<DigestTable>,
}

struct DigestTable {
    chunk_size: u64,
    digests: Vec<Hash>,
}

impl TestSignatures {
    pub fn over(data: &[u8], chunk_size: u64) -> Arc<Self> {
        Arc::new(TestSignatures {
            table: Arc::new(DigestTable {
                chunk_size,
                digests: data.chunks(chunk_size as usize).map(sha1).collect(),
            }),
        })
    }
}

impl ChunkSignatureVerifier for DigestTable {
    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    fn verify_chunk(&self, chunk_index: u64, data: &[u8]) -> bool {
        self.digests
            .get(chunk_index as usize)
            .is_some_and(|digest| *digest == sha1(data))
    }
}

impl ChunkSignatureVerifierSource for TestSignatures {
    fn create(
        &self,
        _reader: Box<dyn PakStream>,
    ) -> paklode::Result<Arc<dyn ChunkSignatureVerifier>> {
        Ok(self.table.clone())
    }
}
