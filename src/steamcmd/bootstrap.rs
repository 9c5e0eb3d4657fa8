//! Locating steamcmd, downloading it when absent

use crate::error::DownloadError;
use anyhow::{Context, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[cfg(windows)]
const ARCHIVE_URL: &str = "https://steamcdn-a.akamaihd.net/client/installer/steamcmd.zip";
#[cfg(target_os = "macos")]
const ARCHIVE_URL: &str = "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_osx.tar.gz";
#[cfg(all(unix, not(target_os = "macos")))]
const ARCHIVE_URL: &str = "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_linux.tar.gz";

#[cfg(windows)]
pub const EXECUTABLE: &str = "steamcmd.exe";
#[cfg(not(windows))]
pub const EXECUTABLE: &str = "steamcmd.sh";

/// Directory name under the bin dir holding the bundled copy
const BUNDLED_DIR: &str = "steamcmd";

/// Where a downloaded steamcmd lives
pub fn bundled_path(bin_dir: &Path) -> PathBuf {
    bin_dir.join(BUNDLED_DIR).join(EXECUTABLE)
}

/// Find a usable steamcmd: the configured path, then `PATH`, then a
/// previously downloaded copy. Returns `None` if none exists.
pub fn locate(configured: Option<&Path>, bin_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::warn!("Configured steamcmd not found at {}", path.display());
    }

    if let Ok(path) = which::which("steamcmd") {
        tracing::debug!("Using steamcmd from PATH: {}", path.display());
        return Some(path);
    }

    let bundled = bundled_path(bin_dir);
    bundled.is_file().then_some(bundled)
}

/// Locate steamcmd, downloading and unpacking it into `bin_dir` when it
/// cannot be found.
pub async fn ensure_installed(configured: Option<&Path>, bin_dir: &Path) -> Result<PathBuf, DownloadError> {
    if let Some(path) = locate(configured, bin_dir) {
        return Ok(path);
    }

    tracing::info!("steamcmd not found, downloading from {}", ARCHIVE_URL);
    install(bin_dir)
        .await
        .map_err(|e| DownloadError::Bootstrap(format!("{:#}", e)))
}

async fn install(bin_dir: &Path) -> Result<PathBuf> {
    let dest = bin_dir.join(BUNDLED_DIR);
    tokio::fs::create_dir_all(&dest)
        .await
        .context("Failed to create steamcmd directory")?;

    let file_name = ARCHIVE_URL.rsplit('/').next().unwrap_or("steamcmd.archive");
    let archive = bin_dir.join(file_name);
    download_file(ARCHIVE_URL, &archive).await?;

    let (archive_path, dest_path) = (archive.clone(), dest.clone());
    tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest_path))
        .await
        .context("Extraction task failed")??;
    tokio::fs::remove_file(&archive).await.ok();

    let executable = dest.join(EXECUTABLE);
    if !executable.is_file() {
        anyhow::bail!("Archive did not contain {}", EXECUTABLE);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755))
            .context("Failed to mark steamcmd executable")?;
    }

    tracing::info!("Installed steamcmd to {}", executable.display());
    Ok(executable)
}

async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .context("Failed to start download")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status: {}", response.status());
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .context("Failed to create download file")?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).await.context("Error writing to file")?;
        downloaded += chunk.len() as u64;
    }

    file.flush().await?;
    tracing::debug!("Downloaded {} bytes to {}", downloaded, dest.display());
    Ok(())
}

/// Unpack a `.zip` or `.tar.gz` archive into `dest`
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase())
        .unwrap_or_default();

    std::fs::create_dir_all(dest)?;
    if name.ends_with(".zip") {
        extract_zip(archive, dest)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive, dest)
    } else {
        anyhow::bail!("Unknown archive format: {}", archive.display())
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive).context("Failed to open archive")?;
    let mut zip = zip::ZipArchive::new(file).context("Failed to read ZIP archive")?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let outpath = dest.join(sanitize_path(entry.name()));

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = std::fs::File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive).context("Failed to open archive")?;
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    // `unpack` refuses entries that escape `dest`
    tar.unpack(dest).context("Failed to unpack TAR archive")?;
    Ok(())
}

/// Strip traversal components from an archive entry name
fn sanitize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn zip_is_unpacked() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("steamcmd.zip");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("steamcmd.exe", options).unwrap();
            zip.write_all(b"MZ").unwrap();
            zip.start_file("linux32/readme.txt", options).unwrap();
            zip.write_all(b"hi").unwrap();
            zip.finish().unwrap();
        }

        let dest = tmp.path().join("out");
        extract_archive(&archive, &dest).unwrap();
        assert_eq!(std::fs::read(dest.join("steamcmd.exe")).unwrap(), b"MZ");
        assert_eq!(std::fs::read(dest.join("linux32/readme.txt")).unwrap(), b"hi");
    }

    #[test]
    fn tar_gz_is_unpacked() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("steamcmd_linux.tar.gz");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(gz);
            let body = b"#!/bin/sh\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, "steamcmd.sh", &body[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = tmp.path().join("out");
        extract_archive(&archive, &dest).unwrap();
        assert_eq!(std::fs::read(dest.join("steamcmd.sh")).unwrap(), b"#!/bin/sh\n");
    }

    #[test]
    fn unknown_archive_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("steamcmd.rar");
        std::fs::write(&archive, b"x").unwrap();
        assert!(extract_archive(&archive, tmp.path()).is_err());
    }

    #[test]
    fn configured_path_wins_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let exe = tmp.path().join("my-steamcmd");
        std::fs::write(&exe, b"").unwrap();
        assert_eq!(locate(Some(&exe), tmp.path()), Some(exe));
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_path("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_path("linux32\\steamcmd"), "linux32/steamcmd");
    }
}
