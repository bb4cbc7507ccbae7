use crate::signed::{
    ChunkSignatureVerifier, ChunkSignatureVerifierSource, SignatureFailureHandlers,
    SignedPakReader,
};
use crate::Result;
use std::io::{self, Read, Seek};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Seekable archive byte stream.
pub trait PakStream: Read + Seek + Send {}
impl<T: Read + Seek + Send> PakStream for T {}

/// Byte-reader factory collaborator: opens a fresh stream over the archive
/// whenever the pool grows.
pub trait ReaderFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn PakStream>>;
}

/// Factory over a file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileReaderFactory {
    path: PathBuf,
}

impl FileReaderFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReaderFactory for FileReaderFactory {
    fn open(&self) -> Result<Box<dyn PakStream>> {
        Ok(Box::new(std::fs::File::open(&self.path)?))
    }
}

struct IdleReader {
    stream: Box<dyn PakStream>,
    last_used: Instant,
}

struct PoolState {
    idle: Vec<IdleReader>,
    in_use: usize,
    factory: Arc<dyn ReaderFactory>,
    verifier: Option<Arc<dyn ChunkSignatureVerifier>>,
}

/// Pool of archive readers lent out for the duration of one synchronous
/// operation. Readers are stacked LIFO so the hottest handle is reused;
/// idle readers age out; for signed archives every reader wraps the raw
/// stream with the single shared chunk verifier.
pub struct ReaderPool {
    state: Mutex<PoolState>,
    signatures: Option<Arc<dyn ChunkSignatureVerifierSource>>,
    handlers: Arc<SignatureFailureHandlers>,
}

impl ReaderPool {
    pub(crate) fn new(
        factory: Arc<dyn ReaderFactory>,
        signatures: Option<Arc<dyn ChunkSignatureVerifierSource>>,
        handlers: Arc<SignatureFailureHandlers>,
    ) -> Self {
        ReaderPool {
            state: Mutex::new(PoolState {
                idle: vec![],
                in_use: 0,
                factory,
                verifier: None,
            }),
            signatures,
            handlers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_reader(&self, state: &mut PoolState) -> Result<Box<dyn PakStream>> {
        let raw = state.factory.open()?;
        match &self.signatures {
            Some(source) => {
                let verifier = match &state.verifier {
                    Some(verifier) => verifier.clone(),
                    None => {
                        // one verifier per archive, built on first need from
                        // its own bare reader
                        let verifier = source.create(state.factory.open()?)?;
                        state.verifier = Some(verifier.clone());
                        verifier
                    }
                };
                Ok(Box::new(SignedPakReader::new(
                    raw,
                    verifier,
                    self.handlers.clone(),
                )?))
            }
            None => Ok(raw),
        }
    }

    /// Pop an idle reader or create a new one; the handle returns it on
    /// drop.
    pub fn shared_reader(&self) -> Result<SharedReader<'_>> {
        let stream = {
            let mut state = self.lock();
            let stream = match state.idle.pop() {
                Some(idle) => idle.stream,
                None => self.create_reader(&mut state)?,
            };
            state.in_use += 1;
            stream
        };
        Ok(SharedReader {
            pool: self,
            stream: Some(stream),
        })
    }

    fn return_reader(&self, stream: Box<dyn PakStream>) {
        let mut state = self.lock();
        state.in_use -= 1;
        state.idle.push(IdleReader {
            stream,
            last_used: Instant::now(),
        });
    }

    /// Drop idle readers unused for longer than `max_age`. Best effort: if
    /// the pool is contended this returns immediately. When the pool drains
    /// completely the shared verifier is released as well.
    pub fn release_old_readers(&self, max_age: Duration) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        if let Some(newest_old) = state
            .idle
            .iter()
            .rposition(|reader| reader.last_used.elapsed() >= max_age)
        {
            // everything pushed before it is at least as old
            state.idle.drain(..=newest_old);
        }
        if state.idle.is_empty() && state.in_use == 0 {
            state.verifier = None;
        }
    }

    /// Rebuild every idle reader against a new byte provider. Readers
    /// currently loaned out keep their old streams, which is loudly wrong.
    pub fn recreate_readers(&self, factory: Arc<dyn ReaderFactory>) -> bool {
        let mut state = self.lock();
        if state.in_use > 0 {
            tracing::error!(
                in_use = state.in_use,
                "recreating archive readers while some are loaned out; this may lead to \
                 crashes or decryption problems"
            );
        }

        // the verifier holds a stream from the old provider
        state.verifier = None;
        state.factory = factory;

        let mut recreated = Vec::with_capacity(state.idle.len());
        let last_used: Vec<Instant> = state.idle.iter().map(|r| r.last_used).collect();
        state.idle.clear();
        for last_used in last_used {
            match self.create_reader(&mut state) {
                Ok(stream) => recreated.push(IdleReader { stream, last_used }),
                Err(error) => {
                    tracing::warn!(%error, "unable to re-create archive reader handle");
                    return false;
                }
            }
        }
        state.idle = recreated;
        true
    }

    pub(crate) fn verifier(&self) -> Option<Arc<dyn ChunkSignatureVerifier>> {
        self.lock().verifier.clone()
    }

    pub(crate) fn is_signed(&self) -> bool {
        self.signatures.is_some()
    }

    pub(crate) fn handlers(&self) -> &Arc<SignatureFailureHandlers> {
        &self.handlers
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }
}

/// Borrowed archive reader; returns itself to the pool when dropped.
pub struct SharedReader<'a> {
    pool: &'a ReaderPool,
    stream: Option<Box<dyn PakStream>>,
}

impl Read for SharedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.as_mut().expect("stream present until drop").read(buf)
    }
}

impl Seek for SharedReader<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.stream.as_mut().expect("stream present until drop").seek(pos)
    }
}

impl Drop for SharedReader<'_> {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.pool.return_reader(stream);
        }
    }
}
