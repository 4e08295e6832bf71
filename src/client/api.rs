use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::types::{BroadcastRequest, MarkReadResponse, NotificationEvent, PresenceSnapshot};

/// `{ "data": … }` response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// The unread baseline has been served in several shapes over time.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UnreadCountBody {
    Wrapped { data: UnreadCountValue },
    Direct(UnreadCountValue),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UnreadCountValue {
    Object {
        #[serde(rename = "unreadCount")]
        unread_count: u64,
    },
    Number(u64),
}

impl UnreadCountValue {
    fn value(&self) -> u64 {
        match self {
            UnreadCountValue::Object { unread_count } => *unread_count,
            UnreadCountValue::Number(n) => *n,
        }
    }
}

/// Decode an unread-count body: `{data:{unreadCount}}`, `{data:n}`,
/// `{unreadCount}` or a bare number.
pub fn parse_unread_count(body: &str) -> Result<u64> {
    let parsed: UnreadCountBody = serde_json::from_str(body)
        .map_err(|e| AppError::Decode(format!("unread count: {}", e)))?;
    Ok(match parsed {
        UnreadCountBody::Wrapped { data } => data.value(),
        UnreadCountBody::Direct(value) => value.value(),
    })
}

/// REST client for the notification endpoints.
pub struct NotificationApi {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl NotificationApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("blogwire/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(token),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match self.token.read().as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_text(&self, builder: RequestBuilder) -> Result<String> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let body = self.send_text(builder).await?;
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        Ok(envelope.data)
    }

    /// GET /api/admin/notifications/unread-count
    pub async fn unread_count(&self) -> Result<u64> {
        let body = self
            .send_text(self.request(Method::GET, "/api/admin/notifications/unread-count"))
            .await?;
        let count = parse_unread_count(&body)?;
        debug!("Unread baseline from server: {}", count);
        Ok(count)
    }

    /// PUT /api/admin/notifications/:id/read
    pub async fn mark_read(&self, id: i64) -> Result<MarkReadResponse> {
        let path = format!("/api/admin/notifications/{}/read", id);
        self.send_json(self.request(Method::PUT, &path)).await
    }

    /// PUT /api/admin/notifications/read-all
    pub async fn mark_all_read(&self) -> Result<MarkReadResponse> {
        self.send_json(self.request(Method::PUT, "/api/admin/notifications/read-all"))
            .await
    }

    /// POST /api/admin/notifications/broadcast
    pub async fn broadcast(&self, title: Option<&str>, content: &str) -> Result<NotificationEvent> {
        let body = BroadcastRequest {
            title: title.map(str::to_string),
            content: Some(content.to_string()),
        };
        self.send_json(
            self.request(Method::POST, "/api/admin/notifications/broadcast")
                .json(&body),
        )
        .await
    }

    /// GET /api/notifications/online-count
    pub async fn online_count(&self) -> Result<PresenceSnapshot> {
        self.send_json(self.request(Method::GET, "/api/notifications/online-count"))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

fn status_error(status: StatusCode, body: &str) -> AppError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| format!("HTTP {}", status));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Unauthorized(message),
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        StatusCode::BAD_REQUEST => AppError::BadRequest(message),
        _ => AppError::Transport(format!("{}: {}", status, message)),
    }
}
