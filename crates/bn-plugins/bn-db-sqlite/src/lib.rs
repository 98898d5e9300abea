//! # bn-db-sqlite Implementation
//!
//! Maps per-community configuration and protected lists onto SQLite.
//! Snowflakes are stored as TEXT: they do not fit in a signed 64-bit column.

use std::str::FromStr;

use async_trait::async_trait;
use bn_core::{
    AppError, AvatarThresholds, ConfigStore, GuildConfig, GuildId, Result, UserId, UsernameThresholds,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS guild_config (
        guild_id      TEXT PRIMARY KEY,
        enabled       INTEGER NOT NULL,
        username_soft INTEGER NOT NULL,
        username_hard INTEGER NOT NULL,
        avatar_soft   REAL NOT NULL,
        avatar_hard   REAL NOT NULL,
        require_both  INTEGER NOT NULL
    )",
    // `position` keeps insertion order, which decides the first username match.
    "CREATE TABLE IF NOT EXISTS protected_users (
        position INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL,
        user_id  TEXT NOT NULL,
        UNIQUE (guild_id, user_id)
    )",
];

pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true);
        // Every connection to `:memory:` is a separate database, so keep one
        // connection alive for the lifetime of the pool.
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "config store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }
}

fn db_err(err: sqlx::Error) -> AppError {
    AppError::Internal(format!("database: {err}"))
}

fn parse_id<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column).map_err(db_err)?;
    raw.parse()
        .map_err(|_| AppError::Internal(format!("malformed id in column {column}: {raw}")))
}

fn row_to_config(row: &SqliteRow) -> Result<GuildConfig> {
    Ok(GuildConfig {
        enabled: row.try_get("enabled").map_err(db_err)?,
        username: UsernameThresholds {
            soft: row.try_get("username_soft").map_err(db_err)?,
            hard: row.try_get("username_hard").map_err(db_err)?,
        },
        avatar: AvatarThresholds {
            soft: row.try_get("avatar_soft").map_err(db_err)?,
            hard: row.try_get("avatar_hard").map_err(db_err)?,
        },
        require_both: row.try_get("require_both").map_err(db_err)?,
    })
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get_config(&self, guild_id: GuildId) -> Result<Option<GuildConfig>> {
        let row = sqlx::query(
            "SELECT enabled, username_soft, username_hard, avatar_soft, avatar_hard, require_both
             FROM guild_config WHERE guild_id = ?",
        )
        .bind(guild_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_config).transpose()
    }

    async fn add_guild(&self, guild_id: GuildId) -> Result<()> {
        let defaults = GuildConfig::default();
        sqlx::query(
            "INSERT OR IGNORE INTO guild_config
             (guild_id, enabled, username_soft, username_hard, avatar_soft, avatar_hard, require_both)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(guild_id.to_string())
        .bind(defaults.enabled)
        .bind(defaults.username.soft)
        .bind(defaults.username.hard)
        .bind(defaults.avatar.soft)
        .bind(defaults.avatar.hard)
        .bind(defaults.require_both)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Config row and protected list go together or not at all.
    async fn remove_guild(&self, guild_id: GuildId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM protected_users WHERE guild_id = ?")
            .bind(guild_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM guild_config WHERE guild_id = ?")
            .bind(guild_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn configured_guilds(&self) -> Result<Vec<GuildId>> {
        let rows = sqlx::query("SELECT guild_id FROM guild_config")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|row| parse_id(row, "guild_id")).collect()
    }

    async fn set_enabled(&self, guild_id: GuildId, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE guild_config SET enabled = ? WHERE guild_id = ? AND enabled <> ?")
            .bind(enabled)
            .bind(guild_id.to_string())
            .bind(enabled)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_username_thresholds(&self, guild_id: GuildId, soft: u32, hard: u32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE guild_config SET username_soft = ?1, username_hard = ?2
             WHERE guild_id = ?3 AND (username_soft <> ?1 OR username_hard <> ?2)",
        )
        .bind(soft)
        .bind(hard)
        .bind(guild_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_avatar_thresholds(&self, guild_id: GuildId, soft: f64, hard: f64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE guild_config SET avatar_soft = ?1, avatar_hard = ?2
             WHERE guild_id = ?3 AND (avatar_soft <> ?1 OR avatar_hard <> ?2)",
        )
        .bind(soft)
        .bind(hard)
        .bind(guild_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_require_both(&self, guild_id: GuildId, require_both: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE guild_config SET require_both = ?1 WHERE guild_id = ?2 AND require_both <> ?1")
                .bind(require_both)
                .bind(guild_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn protected_users(&self, guild_id: GuildId) -> Result<Vec<UserId>> {
        let rows = sqlx::query("SELECT user_id FROM protected_users WHERE guild_id = ? ORDER BY position")
            .bind(guild_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|row| parse_id(row, "user_id")).collect()
    }

    async fn all_protected_users(&self) -> Result<Vec<UserId>> {
        let rows = sqlx::query("SELECT user_id FROM protected_users ORDER BY position")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|row| parse_id(row, "user_id")).collect()
    }

    async fn add_protected_user(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO protected_users (guild_id, user_id) VALUES (?, ?)")
            .bind(guild_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_protected_user(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM protected_users WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId(1_234_567_890_123_456_789);

    async fn store() -> SqliteConfigStore {
        SqliteConfigStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_add_guild_uses_defaults_once() {
        let store = store().await;
        assert_eq!(store.get_config(GUILD).await.unwrap(), None);

        store.add_guild(GUILD).await.unwrap();
        store.set_enabled(GUILD, true).await.unwrap();
        store.add_guild(GUILD).await.unwrap();

        let config = store.get_config(GUILD).await.unwrap().unwrap();
        assert!(config.enabled, "second add must not reset the row");
        assert_eq!(config.username, GuildConfig::default().username);
        assert_eq!(store.configured_guilds().await.unwrap(), vec![GUILD]);
    }

    #[tokio::test]
    async fn test_setters_report_changes() {
        let store = store().await;
        store.add_guild(GUILD).await.unwrap();

        assert!(store.set_enabled(GUILD, true).await.unwrap());
        assert!(!store.set_enabled(GUILD, true).await.unwrap());
        assert!(store.set_require_both(GUILD, false).await.unwrap());
        assert!(!store.set_require_both(GUILD, false).await.unwrap());
        assert!(store.set_username_thresholds(GUILD, 4, 2).await.unwrap());
        assert!(!store.set_username_thresholds(GUILD, 4, 2).await.unwrap());
        assert!(store.set_avatar_thresholds(GUILD, 95.0, 99.0).await.unwrap());

        let config = store.get_config(GUILD).await.unwrap().unwrap();
        assert_eq!((config.username.soft, config.username.hard), (4, 2));
        assert_eq!((config.avatar.soft, config.avatar.hard), (95.0, 99.0));
        assert!(!config.require_both);

        assert!(!store.set_enabled(GuildId(7), true).await.unwrap(), "unknown community");
    }

    #[tokio::test]
    async fn test_protected_list_keeps_insertion_order() {
        let store = store().await;
        for id in [30, 10, 20] {
            assert!(store.add_protected_user(GUILD, UserId(id)).await.unwrap());
        }
        assert!(!store.add_protected_user(GUILD, UserId(10)).await.unwrap());
        store.add_protected_user(GuildId(2), UserId(10)).await.unwrap();

        assert_eq!(
            store.protected_users(GUILD).await.unwrap(),
            vec![UserId(30), UserId(10), UserId(20)]
        );
        assert_eq!(store.all_protected_users().await.unwrap().len(), 4);

        assert!(store.remove_protected_user(GUILD, UserId(10)).await.unwrap());
        assert!(!store.remove_protected_user(GUILD, UserId(10)).await.unwrap());
        assert_eq!(store.protected_users(GUILD).await.unwrap(), vec![UserId(30), UserId(20)]);
    }

    #[tokio::test]
    async fn test_remove_guild_drops_config_and_list() {
        let store = store().await;
        store.add_guild(GUILD).await.unwrap();
        store.add_protected_user(GUILD, UserId(1)).await.unwrap();

        store.remove_guild(GUILD).await.unwrap();
        assert_eq!(store.get_config(GUILD).await.unwrap(), None);
        assert!(store.protected_users(GUILD).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("banna.db").display());

        store_with(&url).await.add_guild(GUILD).await.unwrap();
        let reopened = store_with(&url).await;
        assert!(reopened.get_config(GUILD).await.unwrap().is_some());
    }

    async fn store_with(url: &str) -> SqliteConfigStore {
        SqliteConfigStore::new(url).await.unwrap()
    }
}
