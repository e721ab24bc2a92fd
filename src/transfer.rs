use crate::jobs::TaskContext;
use crate::{EngineError, Result};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const CHUNK_SIZE: usize = 64 * 1024;
const HTTP_TIMEOUT: Duration = Duration::from_secs(600);
const HTTP_USER_AGENT: &str = "movielog-engine/0.1";

/// Where an import's payload bytes come from. Production code uses
/// [`HttpSource`]; tests substitute in-memory sources.
pub trait ByteSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn Read>>;
}

pub struct HttpSource {
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| EngineError::TransferFailed(format!("invalid url {url}: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(EngineError::TransferFailed(format!(
            "unsupported url scheme: {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

fn build_http_agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(HTTP_TIMEOUT))
        .user_agent(HTTP_USER_AGENT);
    config.build().into()
}

impl ByteSource for HttpSource {
    fn open(&self) -> Result<Box<dyn Read>> {
        validate_url(&self.url)?;
        let agent = build_http_agent();
        let response = agent
            .get(&self.url)
            .call()
            .map_err(|e| EngineError::TransferFailed(format!("GET {} failed: {e}", self.url)))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(EngineError::TransferFailed(format!(
                "GET {} returned HTTP {status}",
                self.url
            )));
        }

        Ok(Box::new(response.into_body().into_reader()))
    }
}

/// Deletes the wrapped path on drop. Cancellation, errors, and normal task
/// completion all leave no payload behind in the cache directory.
pub struct TempPath(PathBuf);

impl TempPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Streams the source to `dest` in chunks, re-checking cancellation between
/// chunks. On any failure the partial file is removed before returning.
pub fn download_to_file(source: &dyn ByteSource, dest: &Path, ctx: &TaskContext) -> Result<u64> {
    let mut reader = source.open()?;
    copy_chunked(reader.as_mut(), dest, ctx, |e| {
        EngineError::TransferFailed(format!("download failed: {e}"))
    })
}

/// Decompresses a gzip file to `output`, chunked and cancellable like
/// [`download_to_file`].
pub fn gunzip_to_file(input: &Path, output: &Path, ctx: &TaskContext) -> Result<u64> {
    let file = File::open(input)?;
    let mut decoder = flate2::read::GzDecoder::new(file);
    copy_chunked(&mut decoder, output, ctx, |e| {
        EngineError::DecompressionFailed(format!("gunzip failed: {e}"))
    })
}

fn copy_chunked(
    reader: &mut dyn Read,
    dest: &Path,
    ctx: &TaskContext,
    on_read_err: impl Fn(std::io::Error) -> EngineError,
) -> Result<u64> {
    let mut out = File::create(dest)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        if ctx.is_cancelled() {
            drop(out);
            let _ = std::fs::remove_file(dest);
            return Err(EngineError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                drop(out);
                let _ = std::fs::remove_file(dest);
                return Err(on_read_err(e));
            }
        };
        if let Err(e) = out.write_all(&buf[..n]) {
            drop(out);
            let _ = std::fs::remove_file(dest);
            return Err(e.into());
        }
        written += n as u64;
    }
    out.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct StaticSource(Vec<u8>);

    impl ByteSource for StaticSource {
        fn open(&self) -> Result<Box<dyn Read>> {
            Ok(Box::new(std::io::Cursor::new(self.0.clone())))
        }
    }

    struct FailingSource;

    impl ByteSource for FailingSource {
        fn open(&self) -> Result<Box<dyn Read>> {
            Ok(Box::new(BrokenReader))
        }
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
        }
    }

    fn ctx(cancelled: bool) -> TaskContext {
        TaskContext::new(Arc::new(AtomicBool::new(cancelled)), |_, _, _| {})
    }

    #[test]
    fn non_http_urls_are_rejected() {
        assert!(validate_url("ftp://example.com/file.csv").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("https://example.com/file.csv").is_ok());
    }

    #[test]
    fn download_writes_all_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("payload.bin");
        let source = StaticSource(vec![7u8; 200_000]);

        let written = download_to_file(&source, &dest, &ctx(false)).expect("download");
        assert_eq!(written, 200_000);
        assert_eq!(std::fs::metadata(&dest).expect("meta").len(), 200_000);
    }

    #[test]
    fn cancelled_download_removes_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("payload.bin");
        let source = StaticSource(vec![7u8; 16]);

        let err = download_to_file(&source, &dest, &ctx(true));
        assert!(matches!(err, Err(EngineError::Cancelled)));
        assert!(!dest.exists());
    }

    #[test]
    fn failed_download_removes_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("payload.bin");

        let err = download_to_file(&FailingSource, &dest, &ctx(false));
        assert!(matches!(err, Err(EngineError::TransferFailed(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn gunzip_round_trips_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gz_path = dir.path().join("payload.gz");
        let out_path = dir.path().join("payload.txt");

        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&gz_path).expect("create"),
            flate2::Compression::default(),
        );
        encoder.write_all(b"hello gzip\n").expect("write");
        encoder.finish().expect("finish");

        let written = gunzip_to_file(&gz_path, &out_path, &ctx(false)).expect("gunzip");
        assert_eq!(written, 11);
        assert_eq!(
            std::fs::read_to_string(&out_path).expect("read"),
            "hello gzip\n"
        );
    }

    #[test]
    fn corrupt_gzip_reports_decompression_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gz_path = dir.path().join("payload.gz");
        let out_path = dir.path().join("payload.txt");
        std::fs::write(&gz_path, b"this is not gzip").expect("write");

        let err = gunzip_to_file(&gz_path, &out_path, &ctx(false));
        assert!(matches!(err, Err(EngineError::DecompressionFailed(_))));
        assert!(!out_path.exists());
    }

    #[test]
    fn temp_path_removes_file_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scratch.bin");
        std::fs::write(&path, b"x").expect("write");
        {
            let _guard = TempPath::new(path.clone());
        }
        assert!(!path.exists());
    }
}
