//! # bn-relay
//!
//! HTTP client for the platform relay, the sidecar that holds the gateway
//! session. Implements the member directory, moderation and messaging ports
//! over its JSON API, plus a plain image fetcher.
//!
//! # Configuration
//!
//! - `base_url`: relay endpoint (e.g. "http://127.0.0.1:8700/")
//! - `token`: bearer token the relay expects
//! - `timeout_secs`: per-request timeout

mod fetcher;
mod wire;

use std::time::Duration;

use async_trait::async_trait;
use bn_core::{
    AppError, Capabilities, ChannelId, ChannelInfo, GuildId, InviteRequest, Member, MemberDirectory,
    Messenger, Moderator, Notice, Result, UserId,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub use fetcher::HttpImageFetcher;
use wire::{
    AllowedBody, AuditBody, BanBody, CurrentUserBody, InviteBody, NicknameBody, NoticeBody, UrlBody,
};

#[derive(Debug)]
pub struct RelayConfig {
    pub base_url: String,
    pub token: SecretString,
    pub timeout_secs: u64,
}

pub struct RelayClient {
    http: Client,
    base_url: String,
    token: SecretString,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(AppError::InvalidConfig("relay base url cannot be empty".to_string()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(self.token.expose_secret())
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!(path, %status, "relay call");
        if status.is_success() {
            Ok(response)
        } else {
            Err(status_error(status, path))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path), path).await?;
        response.json().await.map_err(transport_error)
    }

    /// Single-entity read where 404 means absent.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get_json(path).await {
            Ok(value) => Ok(Some(value)),
            Err(AppError::NotFound(..)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn call<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: &B) -> Result<Response> {
        self.send(self.request(method, path).json(body), path).await
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    AppError::Io(format!("relay: {err}"))
}

fn status_error(status: StatusCode, path: &str) -> AppError {
    match status {
        StatusCode::NOT_FOUND => AppError::NotFound("relay resource".to_string(), path.to_string()),
        StatusCode::FORBIDDEN => AppError::PermissionDenied(path.to_string()),
        other => AppError::Io(format!("relay returned {other} for {path}")),
    }
}

#[async_trait]
impl MemberDirectory for RelayClient {
    async fn current_user(&self) -> Result<UserId> {
        let body: CurrentUserBody = self.get_json("users/@me").await?;
        Ok(body.id)
    }

    async fn guilds(&self) -> Result<Vec<GuildId>> {
        self.get_json("guilds").await
    }

    async fn members(&self, guild_id: GuildId) -> Result<Vec<Member>> {
        self.get_json(&format!("guilds/{guild_id}/members")).await
    }

    async fn member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<Member>> {
        self.get_optional(&format!("guilds/{guild_id}/members/{user_id}")).await
    }

    async fn avatar_url(&self, user_id: UserId) -> Result<Option<String>> {
        let body: Option<UrlBody> = self.get_optional(&format!("users/{user_id}/avatar")).await?;
        Ok(body.and_then(|b| b.url))
    }
}

#[async_trait]
impl Moderator for RelayClient {
    async fn capabilities(&self, guild_id: GuildId, user_id: UserId) -> Result<Capabilities> {
        self.get_json(&format!("guilds/{guild_id}/members/{user_id}/capabilities")).await
    }

    async fn set_nickname(&self, guild_id: GuildId, user_id: UserId, nickname: &str) -> Result<()> {
        let path = format!("guilds/{guild_id}/members/{user_id}");
        self.call(Method::PATCH, &path, &NicknameBody { nick: nickname }).await?;
        Ok(())
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
        let path = format!("guilds/{guild_id}/members/{user_id}");
        self.call(Method::DELETE, &path, &AuditBody { reason }).await?;
        Ok(())
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, delete_message_secs: u32, reason: &str) -> Result<()> {
        let path = format!("guilds/{guild_id}/bans/{user_id}");
        self.call(Method::PUT, &path, &BanBody { delete_message_seconds: delete_message_secs, reason })
            .await?;
        Ok(())
    }

    async fn vanity_url(&self, guild_id: GuildId) -> Result<Option<String>> {
        let body: Option<UrlBody> = self.get_optional(&format!("guilds/{guild_id}/vanity")).await?;
        Ok(body.and_then(|b| b.url))
    }

    async fn rules_channel(&self, guild_id: GuildId) -> Result<Option<ChannelInfo>> {
        self.get_optional(&format!("guilds/{guild_id}/rules-channel")).await
    }

    async fn channels(&self, guild_id: GuildId) -> Result<Vec<ChannelInfo>> {
        self.get_json(&format!("guilds/{guild_id}/channels")).await
    }

    async fn create_invite(&self, channel_id: ChannelId, request: &InviteRequest) -> Result<String> {
        let path = format!("channels/{channel_id}/invites");
        let response = self.call(Method::POST, &path, request).await?;
        let body: InviteBody = response.json().await.map_err(transport_error)?;
        Ok(body.url)
    }

    async fn can_manage_guild(&self, guild_id: GuildId) -> Result<bool> {
        let body: AllowedBody = self.get_json(&format!("guilds/{guild_id}/permissions/manage-guild")).await?;
        Ok(body.allowed)
    }

    async fn existing_invites(&self, guild_id: GuildId) -> Result<Vec<String>> {
        let invites: Vec<InviteBody> = self.get_json(&format!("guilds/{guild_id}/invites")).await?;
        Ok(invites.into_iter().map(|i| i.url).collect())
    }
}

#[async_trait]
impl Messenger for RelayClient {
    async fn notify(&self, guild_id: GuildId, user_id: UserId, notice: Notice) -> Result<()> {
        let path = format!("users/{user_id}/notices");
        self.call(Method::POST, &path, &NoticeBody { guild_id, notice }).await?;
        Ok(())
    }
}
