use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use tfplugin_schema::{Context, DataSourceHandler, OperationResult, ResourceData, ResourceHandler};
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::{
    ensure_contained, file_id, parse_permission, resolve_subpath, sha256_hex, LocalFsConfig,
    DEFAULT_FILE_PERMISSION,
};

/// Resolves `path` below the configured root, returning the file's ID alongside
async fn locate(ctx: &Context, path: &str) -> anyhow::Result<(String, PathBuf)> {
    let root = &LocalFsConfig::from_context(ctx)?.root;
    let resolved = resolve_subpath(root, path)?;
    ensure_contained(root, &resolved).await?;
    let id = file_id(root, &resolved)?;
    Ok((id, resolved))
}

fn permission(data: &ResourceData) -> anyhow::Result<u32> {
    let permission = data
        .get_str("file_permission")
        .unwrap_or(DEFAULT_FILE_PERMISSION);
    parse_permission(permission).with_context(|| format!("invalid file permission `{permission}`"))
}

#[cfg(unix)]
async fn set_permission(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_permission(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn file_mode(md: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt as _;

    Some(md.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_md: &std::fs::Metadata) -> Option<u32> {
    None
}

/// Writes the planned content and permission of the file at `path`
async fn write_file(path: &Path, data: &mut ResourceData) -> anyhow::Result<()> {
    let content = data.get_str("content").context("content is not set")?.to_string();
    let mode = permission(data)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory `{}`", parent.display()))?;
    }
    debug!("write file at `{}`", path.display());
    fs::write(path, &content)
        .await
        .with_context(|| format!("failed to write file at `{}`", path.display()))?;
    set_permission(path, mode)
        .await
        .with_context(|| format!("failed to set permission of `{}`", path.display()))?;
    data.set("content_sha256", sha256_hex(content.as_bytes()));
    Ok(())
}

/// Reads the file at `path`; `None` when it does not exist
async fn read_file(path: &Path) -> anyhow::Result<Option<(String, std::fs::Metadata)>> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(anyhow!(err).context(format!("failed to read file at `{}`", path.display())))
        }
    };
    let content = String::from_utf8(content)
        .with_context(|| format!("file at `{}` is not valid UTF-8", path.display()))?;
    let md = fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat file at `{}`", path.display()))?;
    Ok(Some((content, md)))
}

/// The `localfs_file` resource
pub(crate) struct FileResource;

#[async_trait]
impl ResourceHandler for FileResource {
    #[instrument(level = "debug", skip_all)]
    async fn create(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()> {
        let path = data.get_str("path").context("path is not set")?.to_string();
        let (id, resolved) = locate(ctx, &path).await?;
        let exists = fs::try_exists(&resolved)
            .await
            .with_context(|| format!("failed to check whether file `{id}` exists"))?;
        if exists {
            return Err(anyhow!("file `{id}` already exists").into());
        }
        if let Err(err) = write_file(&resolved, data).await {
            match fs::remove_file(&resolved).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, "failed to remove partially written file `{id}`"),
            }
            return Err(err.into());
        }
        data.set_id(id);
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn read(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()> {
        let id = data.id().context("file has no ID")?.to_string();
        let (_, resolved) = locate(ctx, &id).await?;
        let Some((content, md)) = read_file(&resolved).await? else {
            debug!("file `{id}` no longer exists");
            data.clear_id();
            return Ok(());
        };
        if data.get("path").is_null() {
            data.set("path", id.as_str());
        }
        data.set("content_sha256", sha256_hex(content.as_bytes()));
        data.set("content", content);
        // "644" and "0644" name the same mode, keep whichever form is in state
        if let Some(mode) = file_mode(&md) {
            let current = data.get_str("file_permission").and_then(parse_permission);
            if current != Some(mode) {
                data.set("file_permission", format!("{mode:04o}"));
            }
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn update(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()> {
        let id = data.id().context("file has no ID")?.to_string();
        let (_, resolved) = locate(ctx, &id).await?;
        if data.has_change("content") || data.has_change("file_permission") {
            write_file(&resolved, data).await?;
        } else {
            let digest = sha256_hex(data.get_str("content").unwrap_or_default().as_bytes());
            data.set("content_sha256", digest);
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn delete(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()> {
        let id = data.id().context("file has no ID")?.to_string();
        let (_, resolved) = locate(ctx, &id).await?;
        debug!("remove file at `{}`", resolved.display());
        match fs::remove_file(&resolved).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow!(err)
                .context(format!("failed to remove file at `{}`", resolved.display()))
                .into()),
        }
    }

    /// The import ID is the file's path
    async fn import(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()> {
        let path = data.id().context("import ID is empty")?.to_string();
        let (id, _) = locate(ctx, &path).await?;
        data.set("path", path);
        data.set_id(id);
        Ok(())
    }
}

/// The `localfs_file` data source
pub(crate) struct FileDataSource;

#[async_trait]
impl DataSourceHandler for FileDataSource {
    #[instrument(level = "debug", skip_all)]
    async fn read(&self, ctx: &Context, data: &mut ResourceData) -> OperationResult<()> {
        let path = data.get_str("path").context("path is not set")?.to_string();
        let (id, resolved) = locate(ctx, &path).await?;
        let (content, _) = read_file(&resolved)
            .await?
            .with_context(|| format!("file `{id}` does not exist"))?;
        data.set("content_sha256", sha256_hex(content.as_bytes()));
        data.set("content", content);
        data.set_id(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;
    use tfplugin_schema::Value;

    use super::*;

    fn context(dir: &TempDir) -> Context {
        let root = dir.path().canonicalize().unwrap();
        Context::new(
            Some(Arc::new(LocalFsConfig {
                root: Arc::new(root),
            })),
            Default::default(),
        )
    }

    fn planned(path: &str, content: &str, permission: &str) -> ResourceData {
        ResourceData::new(Value::object([
            ("path", Value::string(path)),
            ("content", Value::string(content)),
            ("file_permission", Value::string(permission)),
            ("content_sha256", Value::Unknown),
            ("id", Value::Unknown),
        ]))
    }

    #[test_log::test(tokio::test)]
    async fn create_writes_file_with_digest() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let mut data = planned("./nested/a.txt", "hello", "0600");

        FileResource.create(&ctx, &mut data).await.unwrap();

        assert_eq!(data.id(), Some("nested/a.txt"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("nested/a.txt")).unwrap(),
            "hello"
        );
        assert_eq!(data.get_str("content_sha256"), Some(sha256_hex(b"hello").as_str()));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let md = std::fs::metadata(dir.path().join("nested/a.txt")).unwrap();
            assert_eq!(md.permissions().mode() & 0o777, 0o600);
        }

        let mut again = planned("nested/a.txt", "other", "0644");
        let err = FileResource.create(&ctx, &mut again).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn create_rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let mut data = planned("../escape.txt", "nope", "0644");
        assert!(FileResource.create(&ctx, &mut data).await.is_err());
        assert!(!dir.path().join("../escape.txt").exists());
    }

    #[test_log::test(tokio::test)]
    async fn read_refreshes_or_clears_id() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let mut data = planned("a.txt", "hello", "0644");
        FileResource.create(&ctx, &mut data).await.unwrap();

        std::fs::write(dir.path().join("a.txt"), "changed outside").unwrap();
        FileResource.read(&ctx, &mut data).await.unwrap();
        assert_eq!(data.get_str("content"), Some("changed outside"));
        assert_eq!(
            data.get_str("content_sha256"),
            Some(sha256_hex(b"changed outside").as_str())
        );
        #[cfg(unix)]
        assert_eq!(data.get_str("file_permission"), Some("0644"));

        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        FileResource.read(&ctx, &mut data).await.unwrap();
        assert_eq!(data.id(), None);
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn refresh_keeps_equivalent_permission() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let mut data = planned("a.txt", "hello", "644");
        FileResource.create(&ctx, &mut data).await.unwrap();

        FileResource.read(&ctx, &mut data).await.unwrap();
        assert_eq!(data.get_str("file_permission"), Some("644"));

        {
            use std::os::unix::fs::PermissionsExt as _;
            std::fs::set_permissions(
                dir.path().join("a.txt"),
                std::fs::Permissions::from_mode(0o600),
            )
            .unwrap();
        }
        FileResource.read(&ctx, &mut data).await.unwrap();
        assert_eq!(data.get_str("file_permission"), Some("0600"));
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn symlinked_directories_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let mut data = planned("link/escaped.txt", "nope", "0644");
        let err = FileResource.create(&ctx, &mut data).await.unwrap_err();
        assert!(err.to_string().contains("outside of root"), "{err}");
        assert!(!outside.path().join("escaped.txt").exists());
        assert_eq!(data.id(), None);

        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let mut source = ResourceData::new(Value::object([(
            "path",
            Value::string("link/secret.txt"),
        )]));
        assert!(FileDataSource.read(&ctx, &mut source).await.is_err());
        assert_eq!(source.get_str("content"), None);
    }

    #[test_log::test(tokio::test)]
    async fn create_fails_when_existence_cannot_be_checked() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        std::fs::write(dir.path().join("a.txt"), "not a directory").unwrap();

        let mut data = planned("a.txt/b.txt", "hello", "0644");
        assert!(FileResource.create(&ctx, &mut data).await.is_err());
        assert_eq!(data.id(), None);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "not a directory"
        );
    }

    #[test_log::test(tokio::test)]
    async fn update_rewrites_changed_content() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let mut created = planned("a.txt", "hello", "0644");
        FileResource.create(&ctx, &mut created).await.unwrap();
        let prior = created.to_owned();

        let mut data = ResourceData::new(Value::object([
            ("path", Value::string("a.txt")),
            ("content", Value::string("goodbye")),
            ("file_permission", Value::string("0644")),
            ("content_sha256", Value::Unknown),
            ("id", Value::string("a.txt")),
        ]))
        .with_prior(state_of(&prior));
        FileResource.update(&ctx, &mut data).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "goodbye"
        );
        assert_eq!(data.get_str("content_sha256"), Some(sha256_hex(b"goodbye").as_str()));
    }

    fn state_of(data: &ResourceData) -> Value {
        Value::object(
            ["path", "content", "file_permission", "content_sha256", "id"]
                .map(|name| (name, data.get(name).clone())),
        )
    }

    #[test_log::test(tokio::test)]
    async fn delete_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let mut data = planned("a.txt", "hello", "0644");
        FileResource.create(&ctx, &mut data).await.unwrap();

        FileResource.delete(&ctx, &mut data).await.unwrap();
        assert!(!dir.path().join("a.txt").exists());
        FileResource.delete(&ctx, &mut data).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn import_normalizes_path_into_id() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "imported").unwrap();

        let mut data = ResourceData::new(Value::Null);
        data.set_id("./sub/b.txt");
        FileResource.import(&ctx, &mut data).await.unwrap();
        FileResource.read(&ctx, &mut data).await.unwrap();

        assert_eq!(data.id(), Some("sub/b.txt"));
        assert_eq!(data.get_str("path"), Some("./sub/b.txt"));
        assert_eq!(data.get_str("content"), Some("imported"));
    }

    #[test_log::test(tokio::test)]
    async fn data_source_reads_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        std::fs::write(dir.path().join("c.txt"), "data").unwrap();

        let mut data = ResourceData::new(Value::object([("path", Value::string("c.txt"))]));
        FileDataSource.read(&ctx, &mut data).await.unwrap();
        assert_eq!(data.get_str("content"), Some("data"));
        assert_eq!(data.id(), Some("c.txt"));

        let mut missing = ResourceData::new(Value::object([("path", Value::string("d.txt"))]));
        let err = FileDataSource.read(&ctx, &mut missing).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
