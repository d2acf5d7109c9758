//! Typed wrappers over the REST endpoints.

use super::error::ApiError;
use super::multipart::UploadFile;
use super::transport::Method;
use super::{ApiClient, ApiResult, RequestOptions, UploadOptions};
use crate::session::User;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Server-side identifier; the API sends both integers and strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawId")]
pub struct Id(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

impl From<RawId> for Id {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Int(n) => Id(n.to_string()),
            RawId::Str(s) => Id(s),
        }
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// List endpoints answer with a bare array or a page object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Plain(Vec<T>),
    Paged { items: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Plain(items) | Listing::Paged { items } => items,
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    #[allow(dead_code)] // Always "bearer" in practice
    pub token_type: Option<String>,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub id: Option<Id>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn identity(&self) -> User {
        User {
            username: self.username.clone(),
            role: self.role.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
struct PasswordChange<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Id,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub is_current: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: Id,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub restored_image_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub config: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreResult {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub restored_image_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Percent-encode a caller-supplied id so it stays a single path segment
fn segment(id: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(id)
}

fn encode<B: Serialize>(body: &B) -> ApiResult<Value> {
    serde_json::to_value(body).map_err(ApiError::Encode)
}

// Auth

impl ApiClient {
    /// Exchange credentials for a token and establish the session.
    ///
    /// The identity is refined from `/auth/me` when that call succeeds.
    pub fn login(&self, username: &str, password: &str, remember_me: bool) -> ApiResult<User> {
        let body = encode(&LoginRequest {
            username,
            password,
            remember_me,
        })?;
        let token: TokenResponse = self.request(
            "/auth/login",
            RequestOptions::new(Method::Post).body(body).public(),
        )?;
        self.store()
            .set_auth(&token.access_token, token.expires_in, User::new(username));

        match self.me() {
            Ok(record) => {
                self.store().update_user(record.identity());
            }
            Err(e) if e.is_auth_failure() => return Err(e),
            Err(e) => debug!("Could not fetch profile after login: {}", e),
        }
        Ok(self.store().user().unwrap_or_else(|| User::new(username)))
    }

    /// Ends the local session; tokens are stateless on the server
    pub fn logout(&self) {
        self.store().clear_auth();
    }

    pub fn validate_token(&self) -> ApiResult<ValidateResponse> {
        self.request("/auth/validate", RequestOptions::new(Method::Post))
    }

    pub fn me(&self) -> ApiResult<UserRecord> {
        self.get("/auth/me")
    }
}

// Profile and sessions

impl ApiClient {
    pub fn profile(&self) -> ApiResult<UserRecord> {
        self.get("/profile")
    }

    pub fn update_profile(&self, update: &UserUpdate) -> ApiResult<UserRecord> {
        let record: UserRecord = self.put("/profile", update)?;
        self.store().update_user(record.identity());
        Ok(record)
    }

    pub fn change_password(&self, current: &str, new: &str) -> ApiResult<Value> {
        self.put(
            "/profile/password",
            &PasswordChange {
                current_password: current,
                new_password: new,
            },
        )
    }

    pub fn sessions(&self) -> ApiResult<Vec<SessionInfo>> {
        self.get::<Listing<SessionInfo>>("/sessions")
            .map(Listing::into_vec)
    }

    pub fn revoke_session(&self, id: &str) -> ApiResult<Value> {
        self.del(&format!("/sessions/{}", segment(id)))
    }
}

// History and restoration

impl ApiClient {
    pub fn history(&self) -> ApiResult<Vec<HistoryItem>> {
        self.get::<Listing<HistoryItem>>("/history")
            .map(Listing::into_vec)
    }

    pub fn history_item(&self, id: &str) -> ApiResult<HistoryItem> {
        self.get(&format!("/history/{}", segment(id)))
    }

    pub fn delete_history_item(&self, id: &str) -> ApiResult<Value> {
        self.del(&format!("/history/{}", segment(id)))
    }

    pub fn restore<P: FnMut(u8)>(
        &self,
        file: &UploadFile,
        model_id: Option<&str>,
        on_progress: P,
    ) -> ApiResult<RestoreResult> {
        let mut options = UploadOptions::default();
        if let Some(model_id) = model_id {
            options
                .fields
                .push(("model_id".to_string(), model_id.to_string()));
        }
        self.upload_file_with("/restore", file, options, on_progress)
    }
}

// Administration

impl ApiClient {
    pub fn users(&self) -> ApiResult<Vec<UserRecord>> {
        self.get::<Listing<UserRecord>>("/admin/users")
            .map(Listing::into_vec)
    }

    pub fn create_user(&self, user: &NewUser) -> ApiResult<UserRecord> {
        self.post("/admin/users", user)
    }

    pub fn update_user(&self, id: &str, update: &UserUpdate) -> ApiResult<UserRecord> {
        self.put(&format!("/admin/users/{}", segment(id)), update)
    }

    pub fn delete_user(&self, id: &str) -> ApiResult<Value> {
        self.del(&format!("/admin/users/{}", segment(id)))
    }

    pub fn models(&self) -> ApiResult<Vec<ModelConfig>> {
        self.get::<Listing<ModelConfig>>("/admin/models")
            .map(Listing::into_vec)
    }

    pub fn create_model(&self, document: &Value) -> ApiResult<ModelConfig> {
        self.post("/admin/models", document)
    }

    pub fn update_model(&self, id: &str, document: &Value) -> ApiResult<ModelConfig> {
        self.put(&format!("/admin/models/{}", segment(id)), document)
    }

    pub fn delete_model(&self, id: &str) -> ApiResult<Value> {
        self.del(&format!("/admin/models/{}", segment(id)))
    }
}
