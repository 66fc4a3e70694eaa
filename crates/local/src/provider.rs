use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs;

use common::error::{ProviderError, Result};
use common::item::{Item, ItemType, MetadataValue};
use common::provider::{Context, DownloadJob, ItemList, ProviderBase, UploadJob};

use crate::transfer::{LocalDownloadJob, LocalUploadJob};

/// Environment variable pointing the daemon at its root directory.
pub const ROOT_VAR: &str = "STRATUS_ROOT";

/// Prefix of in-flight upload spool files. Client-visible names may not use
/// it, and listings never show it.
pub(crate) const TMP_PREFIX: &str = ".stratus-upload-";

/// Backend serving one directory tree. Item ids are the absolute paths of
/// the entries; the etag derives from the modification time.
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let key = root.display().to_string();
        std::fs::create_dir_all(root).map_err(|e| ProviderError::from_io(e, &key))?;
        let root = root
            .canonicalize()
            .map_err(|e| ProviderError::from_io(e, &key))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an item id onto a path under the root. Ids are normalized
    /// lexically so targets that do not exist yet still resolve.
    fn resolve(&self, item_id: &str) -> Result<PathBuf> {
        let path = Path::new(item_id);
        if !path.is_absolute() {
            return Err(ProviderError::InvalidArgument(format!(
                "item id is not an absolute path: {item_id}"
            )));
        }
        let mut normal = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir => normal.push(Component::RootDir),
                Component::CurDir => {}
                Component::Normal(part) => normal.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ProviderError::InvalidArgument(format!(
                        "item id may not traverse upwards: {item_id}"
                    )))
                }
            }
        }
        if !normal.starts_with(&self.root) {
            return Err(ProviderError::PermissionDenied(format!(
                "{item_id} is outside the provider root"
            )));
        }
        Ok(normal)
    }

    fn child_path(&self, parent_id: &str, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.resolve(parent_id)?.join(name))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ProviderError::InvalidArgument(format!(
            "bad item name: {name:?}"
        )));
    }
    if name.starts_with(TMP_PREFIX) {
        return Err(ProviderError::InvalidArgument(format!(
            "name {name:?} is reserved"
        )));
    }
    Ok(())
}

pub(crate) fn etag_of(modified: SystemTime) -> String {
    modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().to_string())
        .unwrap_or_default()
}

fn rfc3339(t: SystemTime) -> Result<String> {
    time::OffsetDateTime::from(t)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|e| ProviderError::Unknown(e.to_string()))
}

/// Build the item for an existing path.
pub(crate) async fn item_for(root: &Path, path: &Path) -> Result<Item> {
    let item_id = path.display().to_string();
    let meta = fs::metadata(path)
        .await
        .map_err(|e| ProviderError::from_io(e, &item_id))?;
    let modified = meta
        .modified()
        .map_err(|e| ProviderError::from_io(e, &item_id))?;

    let is_root = path == root;
    let item_type = if is_root {
        ItemType::Root
    } else if meta.is_dir() {
        ItemType::Folder
    } else {
        ItemType::File
    };
    let parent_id = if is_root {
        String::new()
    } else {
        path.parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    };
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_owned());

    let mut metadata = HashMap::new();
    if item_type == ItemType::File {
        metadata.insert(
            "size_in_bytes".to_owned(),
            MetadataValue::Int64(meta.len() as i64),
        );
        metadata.insert(
            "last_modified_time".to_owned(),
            MetadataValue::String(rfc3339(modified)?),
        );
    }

    Ok(Item {
        item_id,
        parent_id,
        title,
        etag: etag_of(modified),
        item_type,
        metadata,
    })
}

#[async_trait]
impl ProviderBase for LocalProvider {
    async fn roots(&self, _ctx: &Context) -> Result<ItemList> {
        Ok(vec![item_for(&self.root, &self.root).await?])
    }

    async fn list(
        &self,
        item_id: &str,
        page_token: &str,
        _ctx: &Context,
    ) -> Result<(ItemList, String)> {
        // the whole directory fits in one page
        if !page_token.is_empty() {
            return Err(ProviderError::LogicError("Unknown page token".to_owned()));
        }
        let path = self.resolve(item_id)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| ProviderError::from_io(e, item_id))?;
        if !meta.is_dir() {
            return Err(ProviderError::LogicError(format!(
                "{item_id} is not a folder"
            )));
        }
        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|e| ProviderError::from_io(e, item_id))?;
        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProviderError::from_io(e, item_id))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ProviderError::from_io(e, item_id))?;
            if !file_type.is_dir() && !file_type.is_file() {
                continue;
            }
            items.push(item_for(&self.root, &entry.path()).await?);
        }
        items.sort_by(|a, b| a.title.cmp(&b.title));
        Ok((items, String::new()))
    }

    async fn lookup(&self, parent_id: &str, name: &str, _ctx: &Context) -> Result<ItemList> {
        let path = self.child_path(parent_id, name)?;
        match fs::metadata(&path).await {
            Ok(_) => Ok(vec![item_for(&self.root, &path).await?]),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ProviderError::from_io(e, name)),
        }
    }

    async fn metadata(&self, item_id: &str, _ctx: &Context) -> Result<Item> {
        let path = self.resolve(item_id)?;
        item_for(&self.root, &path).await
    }

    async fn create_folder(&self, parent_id: &str, name: &str, _ctx: &Context) -> Result<Item> {
        let path = self.child_path(parent_id, name)?;
        fs::create_dir(&path)
            .await
            .map_err(|e| ProviderError::from_io(e, name))?;
        item_for(&self.root, &path).await
    }

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        size: i64,
        _content_type: &str,
        allow_overwrite: bool,
        _ctx: &Context,
    ) -> Result<Box<dyn UploadJob>> {
        let path = self.child_path(parent_id, name)?;
        if !allow_overwrite
            && fs::try_exists(&path)
                .await
                .map_err(|e| ProviderError::from_io(e, name))?
        {
            return Err(ProviderError::Exists(name.to_owned()));
        }
        Ok(Box::new(
            LocalUploadJob::new(&self.root, &path, size).await?,
        ))
    }

    async fn update(
        &self,
        item_id: &str,
        size: i64,
        old_etag: &str,
        _ctx: &Context,
    ) -> Result<Box<dyn UploadJob>> {
        let path = self.resolve(item_id)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| ProviderError::from_io(e, item_id))?;
        if !meta.is_file() {
            return Err(ProviderError::LogicError(format!("{item_id} is not a file")));
        }
        if !old_etag.is_empty() {
            let modified = meta
                .modified()
                .map_err(|e| ProviderError::from_io(e, item_id))?;
            if etag_of(modified) != old_etag {
                return Err(ProviderError::Conflict(format!(
                    "etag mismatch for {item_id}"
                )));
            }
        }
        Ok(Box::new(
            LocalUploadJob::new(&self.root, &path, size).await?,
        ))
    }

    async fn download(&self, item_id: &str, _ctx: &Context) -> Result<Box<dyn DownloadJob>> {
        let path = self.resolve(item_id)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| ProviderError::from_io(e, item_id))?;
        if !meta.is_file() {
            return Err(ProviderError::LogicError(format!("{item_id} is not a file")));
        }
        Ok(Box::new(LocalDownloadJob::new(&path).await?))
    }

    async fn delete_item(&self, item_id: &str, _ctx: &Context) -> Result<()> {
        let path = self.resolve(item_id)?;
        if path == self.root {
            return Err(ProviderError::LogicError("cannot delete root".to_owned()));
        }
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| ProviderError::from_io(e, item_id))?;
        if meta.is_dir() {
            fs::remove_dir_all(&path)
                .await
                .map_err(|e| ProviderError::from_io(e, item_id))?;
        } else {
            fs::remove_file(&path)
                .await
                .map_err(|e| ProviderError::from_io(e, item_id))?;
        }
        Ok(())
    }

    async fn move_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
        _ctx: &Context,
    ) -> Result<Item> {
        let source = self.resolve(item_id)?;
        if source == self.root {
            return Err(ProviderError::LogicError("cannot move root".to_owned()));
        }
        let dest = self.child_path(new_parent_id, new_name)?;
        if fs::try_exists(&dest)
            .await
            .map_err(|e| ProviderError::from_io(e, new_name))?
        {
            return Err(ProviderError::Exists(new_name.to_owned()));
        }
        fs::rename(&source, &dest)
            .await
            .map_err(|e| ProviderError::from_io(e, item_id))?;
        item_for(&self.root, &dest).await
    }

    async fn copy_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
        _ctx: &Context,
    ) -> Result<Item> {
        let source = self.resolve(item_id)?;
        let dest = self.child_path(new_parent_id, new_name)?;
        if fs::try_exists(&dest)
            .await
            .map_err(|e| ProviderError::from_io(e, new_name))?
        {
            return Err(ProviderError::Exists(new_name.to_owned()));
        }
        let meta = fs::metadata(&source)
            .await
            .map_err(|e| ProviderError::from_io(e, item_id))?;
        if meta.is_dir() {
            copy_tree(&source, &dest).await?;
        } else {
            fs::copy(&source, &dest)
                .await
                .map_err(|e| ProviderError::from_io(e, item_id))?;
        }
        item_for(&self.root, &dest).await
    }
}

/// Breadth-first directory copy; spool files are not carried over.
async fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    let mut queue = vec![(source.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = queue.pop() {
        let key = from.display().to_string();
        fs::create_dir(&to)
            .await
            .map_err(|e| ProviderError::from_io(e, &key))?;
        let mut entries = fs::read_dir(&from)
            .await
            .map_err(|e| ProviderError::from_io(e, &key))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProviderError::from_io(e, &key))?
        {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ProviderError::from_io(e, &key))?;
            if file_type.is_dir() {
                queue.push((entry.path(), to.join(&name)));
            } else if file_type.is_file() {
                fs::copy(entry.path(), to.join(&name))
                    .await
                    .map_err(|e| ProviderError::from_io(e, &key))?;
            }
        }
    }
    Ok(())
}
