//! reqwest binding of [`BackendApi`] against the Remed REST service.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::backend::{BackendApi, CredentialProvider, VersionedResponse};
use crate::error::{SyncError, SyncResult};
use crate::types::{Conversation, Friend, FriendRequest, FriendRequestKind, Message, UserId};

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn token(&self) -> SyncResult<String> {
        self.credentials.bearer_token().ok_or(SyncError::AuthRequired)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> SyncResult<T> {
        let token = self.token()?;
        let resp = req
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::AuthRequired);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SyncError::Backend {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<T>().await.map_err(|e| SyncError::Backend {
            status: status.as_u16(),
            message: format!("malformed response body: {e}"),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[derive(Deserialize)]
struct ConversationsDto {
    conversations: Vec<Conversation>,
}

#[derive(Deserialize)]
struct MessagesDto {
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct MessageDto {
    message: Message,
}

#[derive(Deserialize)]
struct FriendRequestDto {
    request: FriendRequest,
}

/// Shared shape of the versioned collection endpoints. Exactly one of the
/// collection fields is populated per endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionedDto<T> {
    #[serde(default)]
    unchanged: bool,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    delta_update: bool,
    #[serde(default = "Vec::new")]
    friends: Vec<T>,
    #[serde(default = "Vec::new")]
    friend_ids: Vec<T>,
    #[serde(default = "Vec::new")]
    friend_requests: Vec<T>,
}

impl<T> VersionedDto<T> {
    fn into_response(self) -> SyncResult<VersionedResponse<T>> {
        if self.unchanged {
            return Ok(VersionedResponse::Unchanged);
        }
        let Some(version) = self.version else {
            return Err(SyncError::Backend {
                status: 200,
                message: "versioned response missing version token".into(),
            });
        };
        let mut items = self.friends;
        if items.is_empty() {
            items = self.friend_ids;
        }
        if items.is_empty() {
            items = self.friend_requests;
        }
        Ok(VersionedResponse::Changed {
            items,
            version,
            delta_update: self.delta_update,
        })
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_conversations(&self) -> SyncResult<Vec<Conversation>> {
        let dto: ConversationsDto = self
            .request_json(self.client.get(self.url("/conversations")))
            .await?;
        Ok(dto.conversations)
    }

    async fn fetch_messages(
        &self,
        other_user_id: &str,
        limit: usize,
        before_ts: Option<i64>,
    ) -> SyncResult<Vec<Message>> {
        let mut req = self
            .client
            .get(self.url(&format!("/conversations/{other_user_id}/messages")))
            .query(&[("limit", limit.to_string())]);
        if let Some(before) = before_ts {
            req = req.query(&[("beforeTimestamp", before.to_string())]);
        }
        let dto: MessagesDto = self.request_json(req).await?;
        Ok(dto.messages)
    }

    async fn send_message(&self, receiver_id: &str, content: &str) -> SyncResult<Message> {
        let body = serde_json::json!({
            "receiverId": receiver_id,
            "content": content,
        });
        let dto: MessageDto = self
            .request_json(self.client.post(self.url("/messages")).json(&body))
            .await?;
        Ok(dto.message)
    }

    async fn fetch_friends(
        &self,
        since_version: Option<&str>,
    ) -> SyncResult<VersionedResponse<Friend>> {
        let mut req = self.client.get(self.url("/friends"));
        if let Some(v) = since_version {
            req = req.query(&[("sinceVersion", v)]);
        }
        let dto: VersionedDto<Friend> = self.request_json(req).await?;
        dto.into_response()
    }

    async fn fetch_friend_ids(
        &self,
        since_version: Option<&str>,
    ) -> SyncResult<VersionedResponse<UserId>> {
        let mut req = self
            .client
            .get(self.url("/friends"))
            .query(&[("idsOnly", "true")]);
        if let Some(v) = since_version {
            req = req.query(&[("sinceVersion", v)]);
        }
        let dto: VersionedDto<UserId> = self.request_json(req).await?;
        dto.into_response()
    }

    async fn fetch_friend_requests(
        &self,
        kind: FriendRequestKind,
        since_version: Option<&str>,
    ) -> SyncResult<VersionedResponse<FriendRequest>> {
        let mut req = self
            .client
            .get(self.url("/friend-requests"))
            .query(&[("type", kind.as_str())]);
        if let Some(v) = since_version {
            req = req.query(&[("sinceVersion", v)]);
        }
        let dto: VersionedDto<FriendRequest> = self.request_json(req).await?;
        dto.into_response()
    }

    async fn send_friend_request(&self, to_user_id: &str) -> SyncResult<FriendRequest> {
        let body = serde_json::json!({ "toUserId": to_user_id });
        let dto: FriendRequestDto = self
            .request_json(self.client.post(self.url("/friend-requests")).json(&body))
            .await?;
        Ok(dto.request)
    }

    async fn respond_friend_request(&self, request_id: &str, accept: bool) -> SyncResult<()> {
        let body = serde_json::json!({ "accept": accept });
        let _: serde_json::Value = self
            .request_json(
                self.client
                    .post(self.url(&format!("/friend-requests/{request_id}/respond")))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn remove_friend(&self, user_id: &str) -> SyncResult<()> {
        let _: serde_json::Value = self
            .request_json(self.client.delete(self.url(&format!("/friends/{user_id}"))))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_dto_maps_unchanged() {
        let dto: VersionedDto<Friend> =
            serde_json::from_str(r#"{"unchanged": true}"#).unwrap();
        assert!(matches!(
            dto.into_response().unwrap(),
            VersionedResponse::Unchanged
        ));
    }

    #[test]
    fn versioned_dto_maps_delta() {
        let dto: VersionedDto<String> = serde_json::from_str(
            r#"{"friendIds": ["a", "b"], "version": "v6", "deltaUpdate": true}"#,
        )
        .unwrap();
        match dto.into_response().unwrap() {
            VersionedResponse::Changed {
                items,
                version,
                delta_update,
            } => {
                assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(version, "v6");
                assert!(delta_update);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn versioned_dto_rejects_missing_version() {
        let dto: VersionedDto<String> =
            serde_json::from_str(r#"{"friendIds": ["a"]}"#).unwrap();
        assert!(dto.into_response().is_err());
    }
}
