//! External steamcmd downloader
//!
//! One process per batch: anonymous login, one `workshop_download_item` per
//! id, then quit. Output is streamed line by line and turned into
//! [`DownloadEvent`]s as it arrives.

pub mod bootstrap;
pub mod output;

use crate::error::DownloadError;
use async_trait::async_trait;
use output::{classify, LineKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

pub use bootstrap::ensure_installed;

/// Items to fetch in one steamcmd run
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub app_id: u32,
    /// Passed as `force_install_dir`; items land in
    /// `<dir>/steamapps/workshop/content/<appid>/<id>`
    pub install_dir: PathBuf,
    pub ids: Vec<String>,
}

impl DownloadRequest {
    pub fn new(app_id: u32, install_dir: PathBuf, ids: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        let ids = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        Self {
            app_id,
            install_dir,
            ids,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "+force_install_dir".to_string(),
            self.install_dir.to_string_lossy().into_owned(),
            "+login".to_string(),
            "anonymous".to_string(),
        ];
        for id in &self.ids {
            args.push("+workshop_download_item".to_string());
            args.push(self.app_id.to_string());
            args.push(id.clone());
        }
        args.push("+quit".to_string());
        args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// `percent` is for `id`; `overall` is the batch fraction in 0..=1
    Progress { id: String, percent: f32, overall: f32 },
    ItemSucceeded(String),
    ItemFailed { id: String, reason: String },
    /// Unclassified output, or a failure not tied to a requested item
    Output { line: String, error: bool },
}

/// Per-item results of one batch
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Requested ids the tool never reported on
    pub unreported: Vec<String>,
    pub cancelled: bool,
}

/// Anything that can download a batch of workshop items into a cache
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn run_batch(
        &self,
        request: DownloadRequest,
        cancel: CancellationToken,
        events: UnboundedSender<DownloadEvent>,
    ) -> Result<BatchReport, DownloadError>;
}

/// Runs the real steamcmd binary
#[derive(Debug, Clone)]
pub struct SteamCmd {
    path: PathBuf,
}

impl SteamCmd {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        command
    }
}

#[async_trait]
impl Downloader for SteamCmd {
    async fn run_batch(
        &self,
        request: DownloadRequest,
        cancel: CancellationToken,
        events: UnboundedSender<DownloadEvent>,
    ) -> Result<BatchReport, DownloadError> {
        let mut tracker = BatchTracker::new(&request.ids);
        if request.ids.is_empty() {
            return Ok(tracker.finish(false));
        }

        tracing::info!(
            "Starting {} for {} item(s) of app {}",
            self.path.display(),
            request.ids.len(),
            request.app_id
        );
        let mut child = self
            .command(&request.args())
            .spawn()
            .map_err(|source| DownloadError::Spawn {
                tool: self.path.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Output(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Output(std::io::Error::other("stderr not captured")))?;
        // Raw segments: the tool prints paths in the local code page
        let mut out_lines = BufReader::new(stdout).split(b'\n');
        let mut err_lines = BufReader::new(stderr).split(b'\n');
        let (mut out_done, mut err_done) = (false, false);
        let mut cancelled = false;

        while !(out_done && err_done) {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!("Download cancelled, stopping steamcmd");
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to stop steamcmd: {}", e);
                    }
                    cancelled = true;
                    break;
                }
                line = out_lines.next_segment(), if !out_done => match line.map_err(DownloadError::Output)? {
                    Some(bytes) => decode_line(&bytes),
                    None => {
                        out_done = true;
                        continue;
                    }
                },
                line = err_lines.next_segment(), if !err_done => match line.map_err(DownloadError::Output)? {
                    Some(bytes) => decode_line(&bytes),
                    None => {
                        err_done = true;
                        continue;
                    }
                },
            };

            // Progress updates are often separated by carriage returns only
            for segment in line.split('\r') {
                tracker.handle(segment, &events);
            }
        }

        if !cancelled {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::warn!("steamcmd exited with {}", status);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to wait for steamcmd: {}", e),
            }
        }

        Ok(tracker.finish(cancelled))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Attributes output lines to items. Progress belongs to the first item
/// with no success or failure yet.
pub(crate) struct BatchTracker {
    order: Vec<String>,
    finished: HashSet<String>,
    current_percent: f32,
    report: BatchReport,
}

impl BatchTracker {
    pub(crate) fn new(ids: &[String]) -> Self {
        Self {
            order: ids.to_vec(),
            finished: HashSet::new(),
            current_percent: 0.0,
            report: BatchReport::default(),
        }
    }

    fn current(&self) -> Option<&String> {
        self.order.iter().find(|id| !self.finished.contains(*id))
    }

    /// `(completed + current/100) / total`
    pub(crate) fn overall(&self) -> f32 {
        if self.order.is_empty() {
            return 1.0;
        }
        let completed = self.finished.len() as f32;
        ((completed + self.current_percent / 100.0) / self.order.len() as f32).min(1.0)
    }

    fn is_pending(&self, id: &str) -> bool {
        self.order.iter().any(|o| o == id) && !self.finished.contains(id)
    }

    pub(crate) fn handle(&mut self, line: &str, events: &UnboundedSender<DownloadEvent>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let event = match classify(line) {
            LineKind::Progress(percent) => {
                let Some(id) = self.current().cloned() else {
                    return;
                };
                self.current_percent = percent;
                DownloadEvent::Progress {
                    id,
                    percent,
                    overall: self.overall(),
                }
            }
            LineKind::Success { id } if self.is_pending(&id) => {
                tracing::info!("Downloaded item {}", id);
                self.finished.insert(id.clone());
                self.current_percent = 0.0;
                self.report.succeeded.push(id.clone());
                DownloadEvent::ItemSucceeded(id)
            }
            LineKind::Failure { id: Some(id), reason } if self.is_pending(&id) => {
                tracing::warn!("Download of item {} failed: {}", id, reason);
                self.finished.insert(id.clone());
                self.current_percent = 0.0;
                self.report.failed.push((id.clone(), reason.clone()));
                DownloadEvent::ItemFailed { id, reason }
            }
            LineKind::Failure { .. } => {
                tracing::warn!("steamcmd: {}", line);
                DownloadEvent::Output {
                    line: line.to_string(),
                    error: true,
                }
            }
            LineKind::Success { .. } | LineKind::Other => {
                tracing::debug!("steamcmd: {}", line);
                DownloadEvent::Output {
                    line: line.to_string(),
                    error: false,
                }
            }
        };

        let _ = events.send(event);
    }

    pub(crate) fn finish(mut self, cancelled: bool) -> BatchReport {
        self.report.unreported = self
            .order
            .iter()
            .filter(|id| !self.finished.contains(*id))
            .cloned()
            .collect();
        self.report.cancelled = cancelled;
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn batch_arguments() {
        let request = DownloadRequest::new(
            301650,
            PathBuf::from("/cache"),
            ["1".to_string(), "2".to_string(), "1".to_string()],
        );
        assert_eq!(
            request.args(),
            vec![
                "+force_install_dir",
                "/cache",
                "+login",
                "anonymous",
                "+workshop_download_item",
                "301650",
                "1",
                "+workshop_download_item",
                "301650",
                "2",
                "+quit"
            ]
        );
    }

    #[test]
    fn tracker_attributes_progress_to_first_pending_item() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ids = vec!["10".to_string(), "20".to_string()];
        let mut tracker = BatchTracker::new(&ids);

        tracker.handle("downloading (50.00%)", &tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::Progress {
                id: "10".into(),
                percent: 50.0,
                overall: 0.25
            }
        );

        tracker.handle("Success. Downloaded item 10 to \"/x\" (5 bytes)", &tx);
        assert_eq!(rx.try_recv().unwrap(), DownloadEvent::ItemSucceeded("10".into()));

        tracker.handle("progress: 50.0", &tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::Progress {
                id: "20".into(),
                percent: 50.0,
                overall: 0.75
            }
        );

        tracker.handle("ERROR! Download item 20 failed (Timeout).", &tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::ItemFailed {
                id: "20".into(),
                reason: "Timeout".into()
            }
        );

        let report = tracker.finish(false);
        assert_eq!(report.succeeded, vec!["10"]);
        assert_eq!(report.failed, vec![("20".to_string(), "Timeout".to_string())]);
        assert!(report.unreported.is_empty());
    }

    #[test]
    fn unrequested_items_and_login_errors_are_plain_output() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = BatchTracker::new(&["1".to_string()]);

        tracker.handle("Success. Downloaded item 999 to \"/x\"", &tx);
        assert!(matches!(rx.try_recv().unwrap(), DownloadEvent::Output { error: false, .. }));

        tracker.handle("Logging in user 'anonymous'...FAILED (No Connection)", &tx);
        assert!(matches!(rx.try_recv().unwrap(), DownloadEvent::Output { error: true, .. }));

        let report = tracker.finish(true);
        assert_eq!(report.unreported, vec!["1"]);
        assert!(report.cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_a_script_and_reads_markers() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("fake-steamcmd.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'Loading Steam API...OK'\necho 'Success. Downloaded item 5 to \"x\" (1 bytes)'\necho 'ERROR! Download item 6 failed (Failure).' 1>&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let request = DownloadRequest::new(1, tmp.path().to_path_buf(), ["5".to_string(), "6".to_string()]);
        let report = SteamCmd::new(script)
            .run_batch(request, CancellationToken::new(), tx)
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec!["5"]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_output_does_not_end_the_batch() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("cp1252-steamcmd.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'Success. Downloaded item 5 to \"x\" (1 bytes)'\nprintf 'Loading caf\\351 ...\\n'\necho 'Success. Downloaded item 6 to \"x\" (1 bytes)'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = DownloadRequest::new(1, tmp.path().to_path_buf(), ["5".to_string(), "6".to_string()]);
        let report = SteamCmd::new(script)
            .run_batch(request, CancellationToken::new(), tx)
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec!["5", "6"]);
        assert!(report.unreported.is_empty());

        let mut lossy = None;
        while let Ok(event) = rx.try_recv() {
            if let DownloadEvent::Output { line, .. } = event {
                lossy = Some(line);
            }
        }
        assert_eq!(lossy.as_deref(), Some("Loading caf\u{FFFD} ..."));
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        assert_eq!(decode_line(b"C:\\Jeux\\caf\xe9"), "C:\\Jeux\\caf\u{FFFD}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_the_process() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("slow-steamcmd.sh");
        std::fs::write(&script, "#!/bin/sh\necho started\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let request = DownloadRequest::new(1, tmp.path().to_path_buf(), ["5".to_string()]);
        let report = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            SteamCmd::new(script).run_batch(request, token, tx),
        )
        .await
        .expect("cancel should end the batch")
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.unreported, vec!["5"]);
    }
}
