//! Gmail REST mailbox client
//!
//! OAuth2 authorization-code flow against Google, token persisted to a JSON
//! file and refreshed transparently before it expires.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use qs_core::{AttachmentRef, MailboxConfig, RawContent};

use crate::error::{EmailError, Result};
use crate::mailbox::{MailboxClient, MailboxMessage};
use crate::token::{ErrorResponse, Token, TokenResponse, TokenStore};

const GMAIL_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Largest `maxResults` the list endpoint accepts
const MAX_PAGE_SIZE: usize = 500;

/// Google endpoints; overridable so tests can point at a local server
#[derive(Debug, Clone)]
pub struct GmailEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl Default for GmailEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            api_base: "https://gmail.googleapis.com".to_string(),
        }
    }
}

/// Gmail mailbox client
pub struct GmailClient {
    http: Client,
    config: MailboxConfig,
    endpoints: GmailEndpoints,
    store: TokenStore,
    token: Mutex<Option<Token>>,
    /// Held for the duration of a refresh so concurrent callers wait for it
    /// instead of refreshing twice; `token` itself is never held across I/O
    refresh: Mutex<()>,
}

impl GmailClient {
    pub fn new(config: MailboxConfig) -> Result<Self> {
        Self::with_endpoints(config, GmailEndpoints::default())
    }

    pub fn with_endpoints(config: MailboxConfig, endpoints: GmailEndpoints) -> Result<Self> {
        let store = TokenStore::new(&config.token_path);
        let token = match store.load() {
            Ok(token) => token,
            Err(e) => {
                warn!("Ignoring unreadable token file {}: {}", store.path().display(), e);
                None
            }
        };
        if token.is_some() {
            info!("Found stored Gmail token");
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            config,
            endpoints,
            store,
            token: Mutex::new(token),
            refresh: Mutex::new(()),
        })
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let reason = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| format!("{}: {}", e.error, e.error_description))
                .unwrap_or(body);
            return Err(EmailError::AuthFailed(reason));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Current token: `Ok(access)` when still valid, otherwise the refresh
    /// token to renew it with
    async fn token_snapshot(&self) -> Result<std::result::Result<String, String>> {
        let guard = self.token.lock().await;
        let token = guard.as_ref().ok_or(EmailError::NotAuthenticated)?;
        if !token.is_expired() {
            return Ok(Ok(token.access_token.clone()));
        }
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or(EmailError::NotAuthenticated)?;
        Ok(Err(refresh_token))
    }

    /// Current access token, refreshed first when expired
    async fn access_token(&self) -> Result<String> {
        if let Ok(access) = self.token_snapshot().await? {
            return Ok(access);
        }

        let _refreshing = self.refresh.lock().await;
        // another caller may have refreshed while we waited
        let refresh_token = match self.token_snapshot().await? {
            Ok(access) => return Ok(access),
            Err(refresh_token) => refresh_token,
        };

        debug!("Refreshing Gmail access token");
        let response = self
            .request_token(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        let mut guard = self.token.lock().await;
        // a logout during the refresh wins
        let current = guard.as_ref().ok_or(EmailError::NotAuthenticated)?;
        let refreshed = current.refreshed(response);
        self.store.save(&refreshed)?;
        let access = refreshed.access_token.clone();
        *guard = Some(refreshed);
        info!("Gmail access token refreshed");
        Ok(access)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        access_token: &str,
    ) -> Result<T> {
        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(EmailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!(
            "{}/gmail/v1/users/me/{}",
            self.endpoints.api_base.trim_end_matches('/'),
            path
        ))
        .map_err(|e| EmailError::Config(format!("invalid Gmail API URL: {}", e)))
    }

    fn search_query(&self, since: Option<DateTime<Utc>>) -> String {
        let mut terms = Vec::new();
        // `after:` has whole-second resolution and is exclusive; step back one
        // second so messages sharing the cursor's second are listed again
        if let Some(since) = since {
            terms.push(format!("after:{}", since.timestamp() - 1));
        }
        if let Some(extra) = &self.config.query {
            terms.push(extra.clone());
        }
        terms.join(" ")
    }
}

#[async_trait]
impl MailboxClient for GmailClient {
    fn authorization_url(&self, state: &str) -> Result<String> {
        if self.config.client_id.is_empty() {
            return Err(EmailError::Config("GMAIL_CLIENT_ID not set".to_string()));
        }
        let url = Url::parse_with_params(
            &self.endpoints.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", GMAIL_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| EmailError::Config(format!("invalid auth URL: {}", e)))?;
        Ok(url.into())
    }

    async fn authenticate(&self, code: &str) -> Result<()> {
        let response = self
            .request_token(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        let token = Token::from_response(response);
        self.store.save(&token)?;
        *self.token.lock().await = Some(token);
        info!("Gmail authentication completed");
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.token
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_expired() || t.refresh_token.is_some())
    }

    async fn logout(&self) -> Result<()> {
        *self.token.lock().await = None;
        self.store.delete()?;
        info!("Gmail token removed");
        Ok(())
    }

    async fn list_new_messages(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        known: &(dyn for<'k> Fn(&'k str) -> bool + Sync),
    ) -> Result<Vec<MailboxMessage>> {
        let access_token = self.access_token().await?;
        let q = self.search_query(since);
        let page_size = limit.clamp(1, MAX_PAGE_SIZE).to_string();

        // Gmail lists newest first; walk pages until `limit` unseen ids
        let mut ids = Vec::new();
        let mut skipped = 0usize;
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.api_url("messages")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("maxResults", &page_size);
                if !q.is_empty() {
                    query.append_pair("q", &q);
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page: MessageList = self.get_json(url, &access_token).await?;
            for entry in page.messages {
                if ids.len() == limit {
                    break;
                }
                if known(entry.id.as_str()) {
                    skipped += 1;
                } else {
                    ids.push(entry.id);
                }
            }

            match page.next_page_token {
                Some(next) if ids.len() < limit => page_token = Some(next),
                _ => break,
            }
        }
        debug!("Gmail listed {} new message ids, {} already known", ids.len(), skipped);

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            let mut url = self.api_url(&format!("messages/{}", id))?;
            url.query_pairs_mut().append_pair("format", "full");
            let message: GmailMessage = self.get_json(url, &access_token).await?;
            messages.push(message.into_mailbox_message());
        }

        messages.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        Ok(messages)
    }
}

// ============================================================================
// Gmail API wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    data: Option<String>,
}

impl MessagePart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn decoded_body(&self) -> Option<String> {
        let data = self.body.as_ref()?.data.as_deref()?;
        match URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("Undecodable message body part: {}", e);
                None
            }
        }
    }

    /// First body of the given MIME type, depth first
    fn find_text(&self, mime_type: &str) -> Option<String> {
        if self.filename.is_empty() && self.mime_type.eq_ignore_ascii_case(mime_type) {
            if let Some(text) = self.decoded_body() {
                return Some(text);
            }
        }
        self.parts.iter().find_map(|p| p.find_text(mime_type))
    }

    fn collect_attachments(&self, out: &mut Vec<AttachmentRef>) {
        if !self.filename.is_empty() {
            let body = self.body.as_ref();
            out.push(AttachmentRef {
                filename: self.filename.clone(),
                content_type: self.mime_type.clone(),
                size_bytes: body.map(|b| b.size).unwrap_or(0),
                attachment_id: body.and_then(|b| b.attachment_id.clone()),
            });
        }
        for part in &self.parts {
            part.collect_attachments(out);
        }
    }
}

impl GmailMessage {
    fn received_at(&self) -> DateTime<Utc> {
        self.internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    fn into_mailbox_message(self) -> MailboxMessage {
        let received_at = self.received_at();
        let payload = self.payload.unwrap_or_default();

        let body = payload
            .find_text("text/plain")
            .or_else(|| payload.find_text("text/html"))
            .unwrap_or_else(|| self.snippet.clone());

        let mut raw = RawContent::new(
            payload.header("Subject").unwrap_or_default(),
            payload.header("From").unwrap_or_default(),
            body,
        );
        payload.collect_attachments(&mut raw.attachments);

        MailboxMessage {
            external_id: self.id,
            raw_content: raw,
            received_at,
        }
    }
}
