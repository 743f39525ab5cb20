use std::fs;
use std::io;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use anyhow::anyhow;
use anyhow::ensure;
use attohttpc::header;
use attohttpc::header::HeaderMap;
use attohttpc::Session;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub mod config;
pub mod playlist;
pub mod resolver;
pub mod track;

pub use config::Settings;
pub use resolver::resolve_user_id;
pub use resolver::ResolutionError;
pub use track::sanitize_filename;
pub use track::Track;
pub use track::TracksPage;

const SOUNDCLOUD_BASE_URL: &str = "https://soundcloud.com";
const SOUNDCLOUD_API_URL: &str = "https://api-v2.soundcloud.com";

/// Records requested per listing page.
const PAGE_SIZE: u32 = 100;

/// Connection-level retries per request. HTTP error statuses are final, and
/// a failed track download is never re-attempted within a run.
const TRANSPORT_RETRIES: u32 = 2;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of applying the download policy to one track.
///
/// The pagination loop inspects the kind: `Exists` marks the sync frontier in
/// latest mode, everything else is log-and-continue.
#[derive(Debug)]
pub enum TrackOutcome {
    /// Streamed, renamed into place and size-verified.
    Downloaded,
    /// A file with the target name and the expected size is already on disk.
    Exists,
    /// A file with the target name exists but its size is off; it is left
    /// as-is, never repaired.
    SizeMismatch { expected: u64, actual: u64 },
    /// Anything that kept this track from landing on disk intact.
    Failed(anyhow::Error),
}

/// Counters accumulated over one sync run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub tracks_seen: u64,
    pub downloaded: u64,
    pub already_archived: u64,
    pub size_mismatches: u64,
    pub failed: u64,
}

pub struct Archiver {
    /// Directory the tracks are archived into.
    path: PathBuf,

    /// Web origin serving profile pages.
    base_url: String,

    /// API origin serving track listings.
    api_url: String,

    /// API key appended to every listing and download request.
    client_id: String,

    /// Stop paginating at the first track that is already archived.
    latest_only: bool,

    /// Silence size-mismatch warnings for files already on disk.
    suppress_warnings: bool,

    sess: Session,
}

impl Archiver {
    pub fn builder() -> ArchiverBuilder {
        ArchiverBuilder::default()
    }

    /// Enumerates the user's uploaded tracks and applies the download policy
    /// to each.
    ///
    /// Resolution and listing-page failures abort the run; per-track failures
    /// are counted and logged only.
    pub fn sync(&self, permalink: &str) -> anyhow::Result<SyncReport> {
        let user_id = resolve_user_id(&self.sess, &self.base_url, permalink)?;
        info!(permalink, user_id, "Resolved user");

        let mut report = SyncReport::default();
        let mut offset = 0u64;

        'pages: loop {
            let page = self.fetch_page(user_id, offset)?;
            let last_id = page.collection.last().map(|track| track.id);

            for track in &page.collection {
                report.tracks_seen += 1;

                match self.sync_track(track) {
                    TrackOutcome::Downloaded => report.downloaded += 1,
                    TrackOutcome::Exists => {
                        report.already_archived += 1;
                        if self.latest_only {
                            info!(
                                title = %track.title,
                                id = track.id,
                                "Track already archived; everything older is assumed present"
                            );
                            break 'pages;
                        }
                        debug!(title = %track.title, id = track.id, "Already archived; skipping");
                    }
                    TrackOutcome::SizeMismatch { expected, actual } => {
                        report.size_mismatches += 1;
                        if !self.suppress_warnings {
                            warn!(
                                title = %track.title,
                                id = track.id,
                                expected,
                                actual,
                                "Unexpected size for an existing file"
                            );
                        }
                    }
                    TrackOutcome::Failed(err) => {
                        report.failed += 1;
                        warn!(
                            title = %track.title,
                            id = track.id,
                            error = format!("{err:#}"),
                            "Failed to download"
                        );
                    }
                }
            }

            // The cursor is the id of the last record of the page just read.
            match (page.has_more(), last_id) {
                (true, Some(id)) => offset = id,
                _ => break,
            }
        }

        Ok(report)
    }

    fn fetch_page(&self, user_id: u64, offset: u64) -> anyhow::Result<TracksPage> {
        let url = format!("{}/users/{}/tracks", self.api_url, user_id);
        let resp = self.send_retrying(|sess| {
            sess.get(&url)
                .param("client_id", &self.client_id)
                .param("representation", "")
                .param("limit", PAGE_SIZE)
                .param("offset", offset)
                .param("linked_partitioning", 1)
        })?;
        ensure!(
            resp.is_success(),
            "track listing request returned status {}",
            resp.status()
        );
        Ok(resp.json_utf8()?)
    }

    /// Applies the download policy to one track and reports the outcome as a
    /// value; nothing in here aborts the pagination loop.
    fn sync_track(&self, track: &Track) -> TrackOutcome {
        match self.try_sync_track(track) {
            Ok(outcome) => outcome,
            Err(err) => TrackOutcome::Failed(err),
        }
    }

    fn try_sync_track(&self, track: &Track) -> anyhow::Result<TrackOutcome> {
        let filename = track
            .target_filename()
            .ok_or_else(|| anyhow!("track {} carries no release or creation date", track.id))?;
        let filepath = self.path.join(&filename);

        // The download request is opened before the existence check so the
        // expected size comes from the live response, not cached metadata.
        let resp = self.send_retrying(|sess| {
            sess.get(&track.download_url)
                .param("client_id", &self.client_id)
        })?;
        ensure!(
            resp.is_success(),
            "download request returned status {}",
            resp.status()
        );
        let (_, headers, mut body) = resp.split();
        let expected = declared_length(&headers).unwrap_or(track.original_content_size);

        if filepath.is_file() {
            drop(body);
            let actual = fs::metadata(&filepath)?.len();
            return Ok(if actual == expected {
                TrackOutcome::Exists
            } else {
                TrackOutcome::SizeMismatch { expected, actual }
            });
        }

        info!(filename = %filename, "Downloading");
        let temp_path = self.path.join(track.temp_filename());
        let mut outfile = fs::File::create(&temp_path)?;
        copy_with_progress(&mut body, &mut outfile, expected)?;
        drop(outfile);

        // Commit point: a crash before this line leaves only the temp file,
        // never a partial file under the final name.
        fs::rename(&temp_path, &filepath)?;

        let written = fs::metadata(&filepath)?.len();
        ensure!(
            written == expected,
            "unexpected size for \"{}\": {} bytes on disk, expected {}",
            filename,
            written,
            expected
        );
        Ok(TrackOutcome::Downloaded)
    }

    fn send_retrying<F>(&self, request: F) -> Result<attohttpc::Response, attohttpc::Error>
    where
        F: Fn(&Session) -> attohttpc::RequestBuilder,
    {
        let mut attempts = 0;
        loop {
            match request(&self.sess).send() {
                Ok(resp) => return Ok(resp),
                Err(err) if attempts < TRANSPORT_RETRIES => {
                    attempts += 1;
                    debug!(error = %err, attempts, "Transport error; retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Streams `body` into `out` in 8 KiB chunks, redrawing a progress line on
/// stdout with the transferred share and a KiB/s figure.
fn copy_with_progress<R, W>(body: &mut R, out: &mut W, expected: u64) -> io::Result<u64>
where
    R: Read,
    W: Write,
{
    let start = Instant::now();
    let mut stdout = io::stdout();
    let mut buf = [0u8; 8192];
    let mut transferred: u64 = 0;

    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        transferred += n as u64;

        let done = if expected > 0 {
            (transferred.min(expected) * 50 / expected) as usize
        } else {
            0
        };
        let elapsed = start.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            transferred as f64 / 1024.0 / elapsed
        } else {
            0.0
        };
        write!(
            stdout,
            "\r[{}{}] {:.0} KiB/s",
            "=".repeat(done),
            " ".repeat(50 - done),
            rate
        )?;
        stdout.flush()?;
    }

    // Clean the progress line.
    write!(stdout, "\r")?;
    stdout.flush()?;
    Ok(transferred)
}

#[derive(Debug)]
pub struct ArchiverBuilder {
    path: PathBuf,
    base_url: String,
    api_url: String,
    client_id: String,
    latest_only: bool,
    suppress_warnings: bool,
}

impl ArchiverBuilder {
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn latest_only(mut self, latest_only: bool) -> Self {
        self.latest_only = latest_only;
        self
    }

    pub fn suppress_warnings(mut self, suppress_warnings: bool) -> Self {
        self.suppress_warnings = suppress_warnings;
        self
    }

    pub fn build(self) -> Archiver {
        let mut sess = Session::new();
        sess.connect_timeout(CONNECT_TIMEOUT);
        sess.read_timeout(READ_TIMEOUT);
        Archiver {
            path: self.path,
            base_url: self.base_url,
            api_url: self.api_url,
            client_id: self.client_id,
            latest_only: self.latest_only,
            suppress_warnings: self.suppress_warnings,
            sess,
        }
    }
}

impl Default for ArchiverBuilder {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            base_url: String::from(SOUNDCLOUD_BASE_URL),
            api_url: String::from(SOUNDCLOUD_API_URL),
            client_id: String::new(),
            latest_only: false,
            suppress_warnings: false,
        }
    }
}
