//! localfs provider
//!
//! Manages plain files below a root directory chosen in the provider configuration.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use path_clean::PathClean;
use sha2::{Digest as _, Sha256};
use tfplugin_schema::{
    AttributeSchema, Context, DataSource, Meta, OperationResult, Provider, ProviderConfigurer,
    Resource, ResourceData, Value,
};
use tracing::info;

mod file;

use file::{FileDataSource, FileResource};

pub const FILE_TYPE_NAME: &str = "localfs_file";
pub const DEFAULT_FILE_PERMISSION: &str = "0644";

/// Builds the localfs provider
pub fn provider() -> Provider {
    Provider::new()
        .attribute(
            "root",
            AttributeSchema::string()
                .optional()
                .description(
                    "Directory all file paths are relative to. Defaults to the working directory.",
                ),
        )
        .configurer(Configurer)
        .resource(FILE_TYPE_NAME, file_resource())
        .data_source(FILE_TYPE_NAME, file_data_source())
}

fn file_resource() -> Resource {
    Resource::new(FileResource)
        .description("A file below the provider root")
        .attribute(
            "path",
            AttributeSchema::string()
                .required()
                .force_new()
                .description("Path of the file, relative to the provider root"),
        )
        .attribute(
            "content",
            AttributeSchema::string()
                .required()
                .description("Content of the file"),
        )
        .attribute(
            "file_permission",
            AttributeSchema::string()
                .with_default(DEFAULT_FILE_PERMISSION)
                .validator(validate_permission)
                .description("Permission bits of the file as an octal string"),
        )
        .attribute(
            "content_sha256",
            AttributeSchema::string()
                .computed()
                .description("Hex-encoded SHA-256 of the content"),
        )
}

fn file_data_source() -> DataSource {
    DataSource::new(FileDataSource)
        .description("Reads a file below the provider root")
        .attribute(
            "path",
            AttributeSchema::string()
                .required()
                .description("Path of the file, relative to the provider root"),
        )
        .attribute("content", AttributeSchema::string().computed())
        .attribute("content_sha256", AttributeSchema::string().computed())
}

/// Configured provider state
#[derive(Clone, Debug)]
pub struct LocalFsConfig {
    pub root: Arc<PathBuf>,
}

impl LocalFsConfig {
    pub(crate) fn from_context(ctx: &Context) -> anyhow::Result<&Self> {
        ctx.meta::<Self>().context("provider is not configured")
    }
}

struct Configurer;

#[async_trait]
impl ProviderConfigurer for Configurer {
    async fn configure(
        &self,
        _terraform_version: &str,
        config: &ResourceData,
    ) -> OperationResult<Meta> {
        let root = match config.get_str("root") {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir().context("failed to determine working directory")?,
        };
        let root = tokio::fs::canonicalize(&root)
            .await
            .with_context(|| format!("root `{}` does not exist", root.display()))?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(anyhow::anyhow!("root `{}` is not a directory", root.display()).into());
        }
        info!(root = %root.display(), "localfs provider configured");
        Ok(Arc::new(LocalFsConfig {
            root: Arc::new(root),
        }))
    }
}

/// Resolve a path relative to `root`, ensuring that the result is below it
pub(crate) fn resolve_subpath(
    root: &Path,
    path: impl AsRef<Path>,
) -> Result<PathBuf, std::io::Error> {
    let joined = root.join(&path).clean();

    let mut joined_parts = joined.components();
    for root_part in root.components() {
        if joined_parts.next() != Some(root_part) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!(
                    "Invalid path [{}], is not contained by root path [{}]",
                    path.as_ref().display(),
                    root.display(),
                ),
            ));
        }
    }
    if joined_parts.next().is_none() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid path [{}], does not name a file", path.as_ref().display()),
        ));
    }
    Ok(joined)
}

/// Ensure that `resolved` stays below `root` once symlinks along it are followed
///
/// `root` must be canonical. The deepest existing ancestor of `resolved` (or `resolved` itself) is
/// canonicalized and checked, so a link inside the root cannot point a write outside of it.
pub(crate) async fn ensure_contained(root: &Path, resolved: &Path) -> Result<(), std::io::Error> {
    let escaped = || {
        std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!(
                "Invalid path [{}], resolves outside of root path [{}]",
                resolved.display(),
                root.display(),
            ),
        )
    };
    let mut existing = resolved;
    loop {
        match tokio::fs::canonicalize(existing).await {
            Ok(real) if real.starts_with(root) => return Ok(()),
            Ok(_) => return Err(escaped()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // a dangling link would be followed by the write
                if tokio::fs::symlink_metadata(existing).await.is_ok() {
                    return Err(escaped());
                }
                existing = existing.parent().ok_or_else(escaped)?;
            }
            Err(err) => return Err(err),
        }
    }
}

/// The file's ID: its path below `root`, cleaned and with `/` separators
pub(crate) fn file_id(root: &Path, resolved: &Path) -> anyhow::Result<String> {
    let relative = resolved
        .strip_prefix(root)
        .context("resolved path escaped the root")?;
    let parts: Vec<_> = relative
        .components()
        .map(|part| match part {
            Component::Normal(part) => part.to_str().context("path is not valid UTF-8"),
            other => bail!("unexpected path component {other:?}"),
        })
        .collect::<anyhow::Result<_>>()?;
    Ok(parts.join("/"))
}

pub(crate) fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

pub(crate) fn parse_permission(permission: &str) -> Option<u32> {
    if !(3..=4).contains(&permission.len())
        || !permission.bytes().all(|b| matches!(b, b'0'..=b'7'))
    {
        return None;
    }
    u32::from_str_radix(permission, 8).ok()
}

fn validate_permission(value: &Value) -> Result<(), String> {
    match value.as_str().and_then(parse_permission) {
        Some(_) => Ok(()),
        None => Err(format!(
            "must be an octal permission string such as \"{DEFAULT_FILE_PERMISSION}\""
        )),
    }
}

#[cfg(test)]
mod tests {
    use tfplugin_sdk::ProviderHandler as _;

    use super::*;

    #[test]
    fn provider_is_valid() {
        let provider = provider();
        provider.internal_validate().unwrap();
        let schema = provider.schema();
        assert!(schema.resources.contains_key(FILE_TYPE_NAME));
        assert!(schema.data_sources.contains_key(FILE_TYPE_NAME));
        let file = &schema.resources[FILE_TYPE_NAME].block.attributes;
        assert!(file["file_permission"].optional);
        assert!(file["content_sha256"].computed);
    }

    /// Ensure that only safe subpaths are resolved
    #[test]
    fn resolve_safe_subpath() {
        let root = PathBuf::from("/srv/files");
        assert_eq!(
            resolve_subpath(&root, "./a/../b/c.txt").unwrap(),
            PathBuf::from("/srv/files/b/c.txt")
        );
    }

    /// Ensure that ancestor paths are not allowed to be resolved as subpaths
    #[test]
    fn resolve_fail_ancestor() {
        let root = PathBuf::from("/srv/files");
        let err = resolve_subpath(&root, "../secret").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
        let err = resolve_subpath(&root, "/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
        let err = resolve_subpath(&root, "a/..").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn contained_paths_pass() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        ensure_contained(&root, &root.join("sub/new/a.txt")).await.unwrap();
        ensure_contained(&root, &root.join("b.txt")).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_out_of_root_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone"), root.join("dangling")).unwrap();
        std::os::unix::fs::symlink(root.join("sub"), root.join("inner")).unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        let err = ensure_contained(&root, &root.join("link/escaped.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
        let err = ensure_contained(&root, &root.join("dangling")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
        ensure_contained(&root, &root.join("inner/a.txt")).await.unwrap();
    }

    #[test]
    fn ids_are_relative_and_clean() {
        let root = Path::new("/srv/files");
        let resolved = resolve_subpath(root, "./nested//dir/../a.txt").unwrap();
        assert_eq!(file_id(root, &resolved).unwrap(), "nested/a.txt");
    }

    #[test]
    fn permissions_are_octal() {
        assert_eq!(parse_permission("0644"), Some(0o644));
        assert_eq!(parse_permission("755"), Some(0o755));
        assert_eq!(parse_permission("0948"), None);
        assert_eq!(parse_permission("64"), None);
        assert!(validate_permission(&Value::string("0600")).is_ok());
        assert!(validate_permission(&Value::string("rw-r--r--")).is_err());
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test_log::test(tokio::test)]
    async fn configure_requires_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider();

        let diagnostics = provider
            .configure_provider(
                "1.9.0".to_string(),
                Value::object([("root", Value::string(dir.path().to_string_lossy()))]),
            )
            .await;
        assert!(diagnostics.is_empty(), "{diagnostics:?}");

        let missing = dir.path().join("missing");
        let diagnostics = provider
            .configure_provider(
                "1.9.0".to_string(),
                Value::object([("root", Value::string(missing.to_string_lossy()))]),
            )
            .await;
        assert!(diagnostics.has_errors());
    }
}
