use crate::{reader::PakStream, Result};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

/// Verifier collaborator for signed archives. The archive is divided into
/// fixed-size signing chunks; the verifier owns the signature table and
/// judges each chunk's bytes.
pub trait ChunkSignatureVerifier: Send + Sync {
    fn chunk_size(&self) -> u64;
    fn verify_chunk(&self, chunk_index: u64, data: &[u8]) -> bool;
}

/// Builds the single per-archive verifier on first need, consuming a bare
/// reader for the signature table.
pub trait ChunkSignatureVerifierSource: Send + Sync {
    fn create(&self, reader: Box<dyn PakStream>) -> Result<Arc<dyn ChunkSignatureVerifier>>;
}

#[derive(Debug, Clone, Copy)]
pub struct SignatureFailure {
    pub chunk_index: u64,
    pub offset: u64,
}

type Handler = Arc<dyn Fn(&SignatureFailure) + Send + Sync>;

/// Registry of signature-failure delegates. Failures surface asynchronously
/// through here during `check()` and during normal reads of a signed
/// archive.
#[derive(Default)]
pub struct SignatureFailureHandlers {
    inner: Mutex<(u64, Vec<(u64, Handler)>)>,
}

impl SignatureFailureHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Handler) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.0 += 1;
        let id = inner.0;
        inner.1.push((id, handler));
        id
    }

    pub fn unregister(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.1.retain(|(handler_id, _)| *handler_id != id);
    }

    pub fn notify(&self, failure: &SignatureFailure) {
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.1.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in handlers {
            handler(failure);
        }
    }
}

/// Reader wrapping the raw archive stream with per-chunk signature checks.
/// Whole signing chunks are pulled in and verified before any byte from them
/// is served; failures are reported but the data still flows, leaving the
/// policy to the registered handlers.
pub struct SignedPakReader {
    inner: Box<dyn PakStream>,
    verifier: Arc<dyn ChunkSignatureVerifier>,
    handlers: Arc<SignatureFailureHandlers>,
    total_size: u64,
    position: u64,
    cached_chunk: Option<(u64, Vec<u8>)>,
}

impl SignedPakReader {
    pub fn new(
        mut inner: Box<dyn PakStream>,
        verifier: Arc<dyn ChunkSignatureVerifier>,
        handlers: Arc<SignatureFailureHandlers>,
    ) -> Result<Self> {
        let total_size = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner,
            verifier,
            handlers,
            total_size,
            position: 0,
            cached_chunk: None,
        })
    }

    fn load_chunk(&mut self, chunk_index: u64) -> io::Result<()> {
        if matches!(self.cached_chunk, Some((cached, _)) if cached == chunk_index) {
            return Ok(());
        }
        let chunk_size = self.verifier.chunk_size();
        let start = chunk_index * chunk_size;
        let len = chunk_size.min(self.total_size - start) as usize;
        let mut data = vec![0; len];
        self.inner.seek(SeekFrom::Start(start))?;
        self.inner.read_exact(&mut data)?;
        if !self.verifier.verify_chunk(chunk_index, &data) {
            self.handlers.notify(&SignatureFailure {
                chunk_index,
                offset: start,
            });
        }
        self.cached_chunk = Some((chunk_index, data));
        Ok(())
    }
}

impl Read for SignedPakReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.total_size || buf.is_empty() {
            return Ok(0);
        }
        let chunk_size = self.verifier.chunk_size();
        let chunk_index = self.position / chunk_size;
        self.load_chunk(chunk_index)?;
        let (_, data) = self.cached_chunk.as_ref().expect("chunk just loaded");
        let offset_in_chunk = (self.position - chunk_index * chunk_size) as usize;
        let available = data.len() - offset_in_chunk;
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&data[offset_in_chunk..offset_in_chunk + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for SignedPakReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.total_size as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of archive",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Verifier over precomputed SHA-1 digests, one per chunk.
    struct DigestVerifier {
        chunk_size: u64,
        digests: Vec<crate::Hash>,
    }

    impl DigestVerifier {
        fn over(data: &[u8], chunk_size: u64) -> Self {
            DigestVerifier {
                chunk_size,
                digests: data
                    .chunks(chunk_size as usize)
                    .map(crate::sha1)
                    .collect(),
            }
        }
    }

    impl ChunkSignatureVerifier for DigestVerifier {
        fn chunk_size(&self) -> u64 {
            self.chunk_size
        }

        fn verify_chunk(&self, chunk_index: u64, data: &[u8]) -> bool {
            self.digests
                .get(chunk_index as usize)
                .is_some_and(|digest| *digest == crate::sha1(data))
        }
    }

    #[test]
    fn test_signed_reader_reports_tampered_chunk() {
        let mut data = vec![0xAB; 100];
        let verifier = Arc::new(DigestVerifier::over(&data, 32));
        data[40] ^= 1; // tamper second chunk after signing

        let failures = Arc::new(AtomicU32::new(0));
        let handlers = Arc::new(SignatureFailureHandlers::new());
        let counter = failures.clone();
        handlers.register(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        let mut reader = SignedPakReader::new(
            Box::new(io::Cursor::new(data)),
            verifier,
            handlers,
        )
        .unwrap();

        let mut buf = vec![0; 100];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(failures.load(Ordering::Relaxed), 1);
        // the bytes still flow; the handler owns the policy
        assert_eq!(buf[40], 0xAB ^ 1);
    }

    #[test]
    fn test_signed_reader_serves_clean_chunks() {
        let data: Vec<u8> = (0..=255).collect();
        let verifier = Arc::new(DigestVerifier::over(&data, 64));
        let failures = Arc::new(AtomicU32::new(0));
        let handlers = Arc::new(SignatureFailureHandlers::new());
        let counter = failures.clone();
        handlers.register(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        let mut reader =
            SignedPakReader::new(Box::new(io::Cursor::new(data.clone())), verifier, handlers)
                .unwrap();
        reader.seek(SeekFrom::Start(100)).unwrap();
        let mut buf = [0; 56];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[100..156]);
        assert_eq!(failures.load(Ordering::Relaxed), 0);
    }
}
