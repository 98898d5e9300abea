//! Fixtures shared by the cross-crate scenarios: synthesized avatars, an
//! in-memory image host, and an engine wired to real storage plugins.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bn_cache_local::LocalAvatarCache;
use bn_core::{
    AppError, ConfigStore, GuildId, ImageFetcher, Member, MemberDirectory, Messenger, Moderator,
    Result, UserId,
};
use bn_db_sqlite::SqliteConfigStore;
use bn_engine::{Engine, EngineOptions, Ports};
use image::{ImageFormat, Rgba, RgbaImage};

pub const GUILD: GuildId = GuildId(700);
pub const SERVICE_ACCOUNT: UserId = UserId(1);

/// 32x32 PNG with a diagonal split between two colours.
pub fn avatar_png(fg: [u8; 3], bg: [u8; 3]) -> Vec<u8> {
    let img = RgbaImage::from_fn(32, 32, |x, y| {
        let [r, g, b] = if x > y { fg } else { bg };
        Rgba([r, g, b, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("encoding an in-memory png cannot fail");
    out.into_inner()
}

pub fn member(user_id: u64, username: &str, avatar_url: Option<&str>) -> Member {
    Member {
        guild_id: GUILD,
        user_id: UserId(user_id),
        username: username.to_string(),
        display_name: username.to_string(),
        nickname: None,
        is_bot: false,
        avatar_url: avatar_url.map(str::to_string),
    }
}

/// Serves registered bytes by URL and counts requests.
#[derive(Default)]
pub struct ImageHost {
    images: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl ImageHost {
    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.images.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageFetcher for ImageHost {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.images
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Io(format!("404 for {url}")))
    }
}

/// Engine over a fresh in-memory SQLite store and a cache directory under
/// `cache_root`; the platform side is supplied by the caller.
pub struct Rig {
    pub engine: Engine,
    pub store: Arc<SqliteConfigStore>,
    pub host: Arc<ImageHost>,
}

impl Rig {
    pub async fn new(
        cache_root: &Path,
        directory: impl MemberDirectory + 'static,
        moderator: impl Moderator + 'static,
        messenger: impl Messenger + 'static,
    ) -> Self {
        let store = Arc::new(SqliteConfigStore::new("sqlite::memory:").await.unwrap());
        let host = Arc::new(ImageHost::default());
        let cache = LocalAvatarCache::new(cache_root.to_path_buf(), host.clone());

        let engine = Engine::new(
            Ports {
                config: store.clone() as Arc<dyn ConfigStore>,
                directory: Arc::new(directory),
                moderator: Arc::new(moderator),
                messenger: Arc::new(messenger),
                cache: Arc::new(cache),
                fetcher: host.clone(),
            },
            EngineOptions::default(),
        );
        Self { engine, store, host }
    }
}
