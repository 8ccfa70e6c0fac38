//! Engine artifact cache and download.
//!
//! Layout: one binary per engine version under the cache root,
//! `hearth-engine-v<version><exe-suffix>`. Downloads stream into a
//! `.partial` file while a SHA-256 digest accumulates, get verified against
//! the release's `checksums.txt`, and are renamed into place only after the
//! digest matches. Everything that fails while fetching is a download
//! failure; everything that fails while installing a verified artifact is a
//! provisioning failure.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use hearth_protocol::Version;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};

const DEFAULT_DISTRIBUTION_BASE: &str = "https://releases.hearth.dev/engine";

/// On-disk name of the cached binary for `version`.
pub(crate) fn cached_binary_name(version: Version) -> String {
    format!("hearth-engine-v{version}{}", std::env::consts::EXE_SUFFIX)
}

/// Release artifact name for this platform.
fn artifact_name(version: Version) -> String {
    format!(
        "hearth-engine-v{version}-{}-{}{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        std::env::consts::EXE_SUFFIX
    )
}

fn cache_root(config: &Config) -> Result<PathBuf> {
    if let Some(dir) = &config.cache_dir {
        return Ok(dir.clone());
    }
    dirs::cache_dir()
        .map(|base| base.join("hearth").join("engine"))
        .ok_or_else(|| {
            Error::Provision("no cache directory available on this platform".to_string())
        })
}

/// Locate or install the engine binary for `config.engine_version` and
/// return its path. A cached binary short-circuits the network entirely.
pub(crate) async fn ensure_engine(config: &Config) -> Result<PathBuf> {
    let root = cache_root(config)?;
    let target = root.join(cached_binary_name(config.engine_version));
    if fs::try_exists(&target).await.unwrap_or(false) {
        debug!(path = %target.display(), "using cached engine binary");
        return Ok(target);
    }

    fs::create_dir_all(&root)
        .await
        .map_err(|e| Error::Provision(format!("create cache dir {}: {e}", root.display())))?;
    download_engine(config, &root, &target).await?;

    // The rename just succeeded; a missing file now means local corruption.
    if !fs::try_exists(&target).await.unwrap_or(false) {
        return Err(Error::Provision(format!(
            "engine binary missing after install: {}",
            target.display()
        )));
    }
    Ok(target)
}

async fn download_engine(config: &Config, root: &Path, target: &Path) -> Result<()> {
    let base = config
        .distribution_base
        .as_deref()
        .unwrap_or(DEFAULT_DISTRIBUTION_BASE)
        .trim_end_matches('/');
    let version = config.engine_version;
    let artifact = artifact_name(version);

    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()
        .map_err(|e| Error::Download(format!("build http client: {e}")))?;

    let expected = fetch_expected_checksum(&client, base, version, &artifact).await?;

    let url = format!("{base}/v{version}/{artifact}");
    info!(%url, "downloading engine binary");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Download(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::Download(format!("{url}: HTTP {}", response.status())));
    }

    let partial = root.join(format!(".{artifact}.partial"));
    let mut file = fs::File::create(&partial)
        .await
        .map_err(|e| Error::Download(format!("create {}: {e}", partial.display())))?;
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Download(format!("{url}: {e}")))?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::Download(format!("write {}: {e}", partial.display())))?;
    }
    file.flush()
        .await
        .map_err(|e| Error::Download(format!("write {}: {e}", partial.display())))?;
    drop(file);

    let actual = format!("{:x}", hasher.finalize());
    if actual != expected {
        let _ = fs::remove_file(&partial).await;
        return Err(Error::Download(format!(
            "checksum mismatch for {artifact}: expected {expected}, got {actual}"
        )));
    }

    make_executable(&partial).await?;
    fs::rename(&partial, target)
        .await
        .map_err(|e| Error::Provision(format!("install {}: {e}", target.display())))?;
    info!(path = %target.display(), %version, "engine binary installed");
    Ok(())
}

async fn fetch_expected_checksum(
    client: &reqwest::Client,
    base: &str,
    version: Version,
    artifact: &str,
) -> Result<String> {
    let url = format!("{base}/v{version}/checksums.txt");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Download(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::Download(format!("{url}: HTTP {}", response.status())));
    }
    let manifest = response
        .text()
        .await
        .map_err(|e| Error::Download(format!("{url}: {e}")))?;
    parse_checksum(&manifest, artifact)
        .ok_or_else(|| Error::Download(format!("no checksum entry for {artifact}")))
}

/// `sha256sum` manifest format: `<hex-digest>  <name>`, one pair per line.
/// A leading `*` on the name (binary-mode marker) is tolerated.
fn parse_checksum(manifest: &str, artifact: &str) -> Option<String> {
    manifest.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?;
        let name = name.strip_prefix('*').unwrap_or(name);
        (name == artifact).then(|| digest.to_ascii_lowercase())
    })
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| Error::Provision(format!("chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_carry_version_and_platform() {
        let version = Version::new(0, 9, 2);
        assert!(cached_binary_name(version).starts_with("hearth-engine-v0.9.2"));
        let artifact = artifact_name(version);
        assert!(artifact.contains("0.9.2"));
        assert!(artifact.contains(std::env::consts::OS));
        assert!(artifact.contains(std::env::consts::ARCH));
    }

    #[test]
    fn checksum_lookup_matches_exact_name() {
        let manifest = "\
abc123  hearth-engine-v0.9.2-linux-x86_64
DEF456  *hearth-engine-v0.9.2-darwin-aarch64
";
        assert_eq!(
            parse_checksum(manifest, "hearth-engine-v0.9.2-linux-x86_64"),
            Some("abc123".to_string())
        );
        // Binary-mode marker stripped, digest lowercased.
        assert_eq!(
            parse_checksum(manifest, "hearth-engine-v0.9.2-darwin-aarch64"),
            Some("def456".to_string())
        );
        assert_eq!(parse_checksum(manifest, "hearth-engine-v0.0.1-none"), None);
    }

    #[test]
    fn checksum_lookup_skips_malformed_lines() {
        let manifest = "justonefield\n\nabc  name  extra\n";
        assert_eq!(parse_checksum(manifest, "name"), Some("abc".to_string()));
        assert_eq!(parse_checksum(manifest, "justonefield"), None);
    }

    #[tokio::test]
    async fn cached_binary_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder()
            .cache_dir(dir.path())
            // Unroutable base: any network attempt would fail loudly.
            .distribution_base("http://127.0.0.1:1")
            .build()
            .unwrap();
        let cached = dir.path().join(cached_binary_name(config.engine_version));
        tokio::fs::write(&cached, b"#!/bin/sh\n").await.unwrap();

        let found = ensure_engine(&config).await.unwrap();
        assert_eq!(found, cached);
    }
}
