use std::{
    fs::{self, File},
    io::{self, Read},
    path::Path,
    time::Duration,
};

use log::{error, info, warn};
use reqwest::{
    blocking::Client,
    header::{UPGRADE_INSECURE_REQUESTS, USER_AGENT},
    StatusCode,
};
use thiserror::Error;

use super::lib_retry::{Pause, RetryPolicy};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error while reading response: {0}")]
    Io(#[from] io::Error),

    #[error("Temporarily unavailable ({0})")]
    Unavailable(StatusCode),

    #[error("Download failed! {0}")]
    Status(StatusCode),

    #[error("Failed to write {path}: {source}")]
    Disk { path: String, source: io::Error },
}

impl FetchError {
    /// Worth trying again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Http(_) | FetchError::Io(_) | FetchError::Unavailable(_)
        )
    }
}

/// One GET request.  The body is handed back as a reader so it can be
/// streamed to disk.
pub trait Transport {
    fn fetch(&self, url: &str) -> Result<(StatusCode, Box<dyn Read + '_>), FetchError>;
}

impl Transport for Client {
    fn fetch(&self, url: &str) -> Result<(StatusCode, Box<dyn Read + '_>), FetchError> {
        let response = Client::get(self, url)
            .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
            .header(UPGRADE_INSECURE_REQUESTS, "1")
            .send()?;
        Ok((response.status(), Box::new(response)))
    }
}

/// A blocking client with a 60 second timeout.
pub fn new_client() -> Result<Client, FetchError> {
    Ok(Client::builder().timeout(Duration::from_secs(60)).build()?)
}

/// Download `url` into `file_path`, retrying transient failures as the
/// `policy` says.  Returns `true` if the file was written.  On failure
/// nothing is left at `file_path`.
///
/// The `label` is only used for logging, e.g. ` (chunk 2/4)`.
pub fn download_with_retry(
    transport: &dyn Transport,
    pause: &dyn Pause,
    policy: &RetryPolicy,
    url: &str,
    file_path: &Path,
    label: &str,
) -> bool {
    for attempt in 0..policy.max_attempts() {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            info!(
                "{} Retry {}/{} in {:.1} seconds...",
                label,
                attempt,
                policy.max_retries,
                delay.as_secs_f64()
            );
            pause.pause(delay);
        }

        match download_once(transport, policy, url, file_path) {
            Ok(bytes) => {
                info!(
                    "{} Download completed successfully on attempt {}, {} bytes",
                    label,
                    attempt + 1,
                    bytes
                );
                return true;
            }
            Err(e) if e.is_transient() => {
                warn!("{} Download attempt {} failed: {}", label, attempt + 1, e);
            }
            Err(e) => {
                error!("{} Download failed, not retrying: {}", label, e);
                discard(file_path);
                return false;
            }
        }
    }
    error!(
        "{} All {} download attempts failed",
        label,
        policy.max_attempts()
    );
    discard(file_path);
    false
}

/// Remove whatever an earlier run left at `file_path`.
fn discard(file_path: &Path) {
    match fs::remove_file(file_path) {
        Ok(()) => warn!("Removed stale file {}", file_path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", file_path.display(), e),
    }
}

fn download_once(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    url: &str,
    file_path: &Path,
) -> Result<u64, FetchError> {
    let (status, mut body) = transport.fetch(url)?;
    if policy.is_retryable(status) {
        return Err(FetchError::Unavailable(status));
    }
    if status.is_client_error() || status.is_server_error() {
        return Err(FetchError::Status(status));
    }

    let disk_error = |source: io::Error| FetchError::Disk {
        path: file_path.display().to_string(),
        source,
    };
    if let Some(dir) = file_path.parent() {
        fs::create_dir_all(dir).map_err(disk_error)?;
    }
    let mut out = File::create(file_path).map_err(disk_error)?;
    match io::copy(&mut body, &mut out) {
        Ok(n) => Ok(n),
        Err(e) => {
            drop(out);
            let _ = fs::remove_file(file_path);
            Err(FetchError::Io(e))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::error::Error;

    /// What the fake server does on one request.
    pub enum Reply {
        Status(StatusCode),
        Body(Vec<u8>),
        NetworkError,
        BrokenBody,
    }

    /// Replays scripted replies in order and counts requests.
    pub struct ScriptedTransport {
        pub replies: RefCell<VecDeque<Reply>>,
        pub requests: RefCell<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<Reply>) -> Self {
            ScriptedTransport {
                replies: RefCell::new(replies.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        pub fn count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    struct FailingReader(Cell<bool>);

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.replace(true) {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            } else {
                buf[..4].copy_from_slice(b"PK\x03\x04");
                Ok(4)
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn fetch(&self, url: &str) -> Result<(StatusCode, Box<dyn Read + '_>), FetchError> {
            self.requests.borrow_mut().push(url.to_string());
            let reply = self
                .replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Reply::Status(StatusCode::SERVICE_UNAVAILABLE));
            match reply {
                Reply::Status(status) => Ok((status, Box::new(io::empty()))),
                Reply::Body(bytes) => Ok((StatusCode::OK, Box::new(io::Cursor::new(bytes)))),
                Reply::NetworkError => Err(FetchError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))),
                Reply::BrokenBody => Ok((StatusCode::OK, Box::new(FailingReader(Cell::new(false))))),
            }
        }
    }

    #[derive(Default)]
    pub struct RecordingPause {
        pub delays: RefCell<Vec<Duration>>,
    }

    impl Pause for RecordingPause {
        fn pause(&self, duration: Duration) {
            self.delays.borrow_mut().push(duration);
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(5),
            growth_factor: 2.0,
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn rate_limited_twice_then_ok() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.zip");
        let transport = ScriptedTransport::new(vec![
            Reply::Status(StatusCode::TOO_MANY_REQUESTS),
            Reply::Status(StatusCode::TOO_MANY_REQUESTS),
            Reply::Body(b"payload".to_vec()),
        ]);
        let pause = RecordingPause::default();
        let ok = download_with_retry(&transport, &pause, &policy(3), "http://x", &path, "");
        assert!(ok);
        assert_eq!(transport.count(), 3);
        assert_eq!(
            *pause.delays.borrow(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
        assert_eq!(fs::read(&path)?, b"payload");
        Ok(())
    }

    #[test]
    fn always_transient_uses_every_attempt() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.zip");
        let transport = ScriptedTransport::new(vec![
            Reply::NetworkError,
            Reply::Status(StatusCode::SERVICE_UNAVAILABLE),
            Reply::NetworkError,
            Reply::Status(StatusCode::TOO_MANY_REQUESTS),
        ]);
        let pause = RecordingPause::default();
        let ok = download_with_retry(&transport, &pause, &policy(3), "http://x", &path, "");
        assert!(!ok);
        assert_eq!(transport.count(), 4);
        assert_eq!(pause.delays.borrow().len(), 3);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn not_found_is_not_retried() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.zip");
        let transport = ScriptedTransport::new(vec![
            Reply::Status(StatusCode::NOT_FOUND),
            Reply::Body(b"never".to_vec()),
        ]);
        let pause = RecordingPause::default();
        let ok = download_with_retry(&transport, &pause, &policy(3), "http://x", &path, "");
        assert!(!ok);
        assert_eq!(transport.count(), 1);
        assert!(pause.delays.borrow().is_empty());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn failure_removes_file_from_earlier_run() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.zip");

        fs::write(&path, b"old archive")?;
        let transport = ScriptedTransport::new(vec![Reply::Status(StatusCode::NOT_FOUND)]);
        let pause = RecordingPause::default();
        assert!(!download_with_retry(&transport, &pause, &policy(3), "http://x", &path, ""));
        assert!(!path.exists());

        fs::write(&path, b"old archive")?;
        let transport = ScriptedTransport::new(vec![Reply::NetworkError, Reply::NetworkError]);
        assert!(!download_with_retry(&transport, &pause, &policy(1), "http://x", &path, ""));
        assert_eq!(transport.count(), 2);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn broken_body_is_removed_and_retried() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("out.zip");
        let transport = ScriptedTransport::new(vec![Reply::BrokenBody, Reply::BrokenBody]);
        let pause = RecordingPause::default();
        let ok = download_with_retry(&transport, &pause, &policy(1), "http://x", &path, "");
        assert!(!ok);
        assert_eq!(transport.count(), 2);
        assert!(!path.exists());
        Ok(())
    }

    #[ignore]
    #[test]
    fn download_live() -> Result<(), Box<dyn Error>> {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sld_fcst.zip");
        let client = new_client()?;
        let url = "http://oasis.caiso.com/oasisapi/SingleZip?queryname=SLD_FCST&market_run_id=2DA&startdatetime=20230919T07:00-0000&enddatetime=20230920T07:00-0000&version=1";
        let ok = download_with_retry(
            &client,
            &super::super::lib_retry::ThreadPause,
            &RetryPolicy::default(),
            url,
            &path,
            "",
        );
        assert!(ok);
        Ok(())
    }
}
