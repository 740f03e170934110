//! Container build context -> content-addressed image reference.

use crate::error::ConfigurationError;
use crate::spec::{CloudContext, ContainerAsset};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Validate a build context and compute its image reference.
///
/// The hash covers every regular file under `context`, visited in sorted
/// relative-path order, so the same tree always yields the same tag.
pub fn package(
    ctx: &CloudContext,
    context: &Path,
    repository: &str,
) -> Result<ContainerAsset, ConfigurationError> {
    if !context.is_dir() {
        return Err(ConfigurationError::MissingBuildContext(context.to_path_buf()));
    }
    if !context.join("Dockerfile").is_file() {
        return Err(ConfigurationError::MissingDockerfile(context.to_path_buf()));
    }

    let files = collect_files(context)?;

    let mut hasher = Sha256::new();
    for (rel, abs) in &files {
        let bytes = fs::read(abs).map_err(|source| ConfigurationError::ReadFile {
            path: abs.clone(),
            source,
        })?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(&bytes);
    }
    let hash = format!("{:x}", hasher.finalize());

    let image_uri = format!(
        "{}.dkr.ecr.{}.{}/{}:{}",
        ctx.account,
        ctx.region,
        ctx.partition.url_suffix(),
        repository,
        hash
    );

    tracing::debug!(context = %context.display(), files = files.len(), %hash, "hashed build context");

    Ok(ContainerAsset {
        context: context.to_path_buf(),
        hash,
        repository: repository.to_string(),
        image_uri,
    })
}

/// Registry host part of an image reference (`<account>.dkr.ecr.<region>.<suffix>`).
pub fn registry_host(image_uri: &str) -> &str {
    image_uri.split('/').next().unwrap_or(image_uri)
}

/// Collect (relative path with '/' separators, absolute path) for every file.
/// Symlinks are followed; a link back to an ancestor is an error.
fn collect_files(root: &Path) -> Result<Vec<(String, PathBuf)>, ConfigurationError> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|source| ConfigurationError::WalkBuildContext {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.push((rel, entry.into_path()));
    }
    // Hash order is by relative path string, not per-directory name order.
    out.sort();
    Ok(out)
}
