//! # bn-cache-local
//! banna/crates/bn-plugins/bn-cache-local/src/lib.rs
//! Local filesystem implementation of `AvatarCache`.
//! One file per protected user, named `{user_id}.png` or `{user_id}.gif`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bn_core::{AvatarCache, AvatarFormat, AvatarSource, CachedAvatar, ImageFetcher, Result, UserId};
use tokio::fs;
use tracing::{debug, info, warn};

pub struct LocalAvatarCache {
    /// Directory holding the cached files (e.g. "./data/avatars")
    root_path: PathBuf,
    fetcher: Arc<dyn ImageFetcher>,
}

impl LocalAvatarCache {
    pub fn new(root: PathBuf, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { root_path: root, fetcher }
    }

    fn file_path(&self, user_id: UserId, format: AvatarFormat) -> PathBuf {
        self.root_path.join(format!("{}.{}", user_id, format.extension()))
    }

    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = target.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::create_dir_all(&self.root_path).await?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, target).await?;
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl AvatarCache for LocalAvatarCache {
    async fn rebuild(&self, sources: &[AvatarSource]) -> Result<()> {
        match fs::remove_dir_all(&self.root_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        fs::create_dir_all(&self.root_path).await?;

        // One download at a time.
        let mut stored = 0usize;
        for source in sources {
            match self.put(source).await {
                Ok(()) => stored += 1,
                Err(err) => warn!(user_id = %source.user_id, error = %err, "failed to cache avatar"),
            }
        }
        info!(stored, requested = sources.len(), path = %self.root_path.display(), "avatar cache rebuilt");
        Ok(())
    }

    async fn put(&self, source: &AvatarSource) -> Result<()> {
        let format = AvatarFormat::from_url(&source.url)?;
        let bytes = self.fetcher.fetch(&source.url).await?;

        // The slot holds one format at most: the old file goes before the new
        // one is written.
        for other in AvatarFormat::ALL.into_iter().filter(|f| *f != format) {
            remove_if_exists(&self.file_path(source.user_id, other)).await?;
        }
        self.write_atomic(&self.file_path(source.user_id, format), &bytes).await?;
        debug!(user_id = %source.user_id, ?format, "avatar cached");
        Ok(())
    }

    async fn remove(&self, user_id: UserId) -> Result<()> {
        for format in AvatarFormat::ALL {
            remove_if_exists(&self.file_path(user_id, format)).await?;
        }
        Ok(())
    }

    async fn load(&self, user_ids: &[UserId]) -> Result<Vec<CachedAvatar>> {
        let mut cached = Vec::with_capacity(user_ids.len());
        for &user_id in user_ids {
            for format in AvatarFormat::ALL {
                match fs::read(self.file_path(user_id, format)).await {
                    Ok(bytes) => {
                        cached.push(CachedAvatar { user_id, format, bytes });
                        break;
                    }
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(cached)
    }
}
