use crate::prelude::*;

use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt::Display;
use std::sync::Mutex;
use std::time::Duration;

use super::transport::{ApiRequest, ApiResponse, Method, Transport, UploadForm, strip_query};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub i64);

impl Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which part of the API a path lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// `/workspaces/{id}` prefixed.
    Workspace(WorkspaceId),
    /// Unprefixed: workspace listing, users, token endpoints.
    Tenant,
}

pub enum Credentials {
    Password { username: String, password: String },
    /// Personal access token. Cannot be refreshed.
    Token(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::Token(_) => f.write_str("Token(..)"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct Tokens {
    access: String,
    refresh: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Page {
        results: Vec<T>,
        #[serde(default)]
        next: Option<String>,
    },
    Items(Vec<T>),
}

/// An authenticated connection to one platform environment.
///
/// Created by [`Session::login`]; must be released with [`Session::logout`].
pub struct Session {
    domain: String,
    base_url: String,
    client_id: String,
    transport: Arc<dyn Transport>,
    tokens: Mutex<Tokens>,
    revoke_on_logout: bool,
    read_timeout: Duration,
    write_timeout: Duration,
    transfer_timeout: Duration,
}

impl Session {
    pub async fn login(
        domain: &str,
        credentials: Credentials,
        settings: &Settings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let domain = domain
            .trim()
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();
        if domain.is_empty() {
            return Err(Error::credential("environment domain is empty"));
        }
        if domain.contains('/') {
            client_bail!("'{domain}' is not an environment domain");
        }
        let mut session = Self {
            base_url: format!("https://{domain}/api"),
            domain,
            client_id: settings.client_id.clone(),
            transport,
            tokens: Mutex::new(Tokens {
                access: String::new(),
                refresh: None,
            }),
            revoke_on_logout: false,
            read_timeout: settings.read_timeout(),
            write_timeout: settings.write_timeout(),
            transfer_timeout: settings.transfer_timeout(),
        };
        match credentials {
            Credentials::Password { username, password } => {
                let body = json!({
                    "client_id": session.client_id,
                    "username": &username,
                    "password": &password,
                    "grant_type": "password",
                });
                let tokens = session.token_grant(body).await.map_err(|e| match e {
                    Error::Http { status, .. } if status.is_client_error() => {
                        Error::credential(format!("login as {username} was rejected ({status})"))
                    }
                    e => e,
                })?;
                session.store_tokens(tokens);
                session.revoke_on_logout = true;
            }
            Credentials::Token(token) => {
                session.store_tokens(TokenResponse {
                    access_token: token,
                    refresh_token: None,
                });
                // Tokens are not checked by any grant; touch the API once instead.
                session.workspaces().await.map_err(|e| match e.http_status() {
                    Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                        Error::credential(format!("personal access token was rejected by {}", session.domain))
                    }
                    _ => e,
                })?;
            }
        }
        info!("Logged in to {}", session.domain);
        Ok(session)
    }

    /// Revokes the access token of a password login. A token login has
    /// nothing to revoke.
    pub async fn logout(&self) -> Result<()> {
        if !self.revoke_on_logout {
            return Ok(());
        }
        let token = self.access_token();
        let url = self.url("/o/revoke_token/", Scope::Tenant);
        let resp = self
            .transport
            .send(ApiRequest {
                method: Method::Post,
                url: url.clone(),
                bearer: None,
                body: Some(json!({"client_id": self.client_id, "token": token})),
                timeout: self.read_timeout,
            })
            .await?;
        if !resp.is_success() {
            return Err(resp.into_error(url)).context("logging out");
        }
        debug!("Revoked access token for {}", self.domain);
        Ok(())
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn transfer_timeout(&self) -> Duration {
        self.transfer_timeout
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, scope: Scope) -> Result<T> {
        let resp = self
            .execute(Method::Get, self.url_checked(path, scope)?, None, self.read_timeout)
            .await?;
        resp.json()
    }

    /// GET of a list endpoint. Follows `{results, next}` envelopes page by page;
    /// a bare array is a single page.
    pub async fn get_list<T: DeserializeOwned>(&self, path: &str, scope: Scope) -> Result<Vec<T>> {
        let mut url = self.url_checked(path, scope)?;
        let mut items = Vec::new();
        loop {
            let resp = self.execute(Method::Get, url, None, self.read_timeout).await?;
            match resp.json::<Listing<T>>()? {
                Listing::Items(page) => {
                    items.extend(page);
                    return Ok(items);
                }
                Listing::Page { results, next } => {
                    items.extend(results);
                    match next {
                        Some(next) => url = next,
                        None => return Ok(items),
                    }
                }
            }
        }
    }

    /// `None` when the server answers without a body.
    pub async fn post(&self, path: &str, body: &Value, scope: Scope) -> Result<Option<Value>> {
        let resp = self
            .execute(
                Method::Post,
                self.url_checked(path, scope)?,
                Some(body.clone()),
                self.read_timeout,
            )
            .await?;
        resp.json_opt()
    }

    pub async fn put(&self, path: &str, body: &Value, scope: Scope) -> Result<Value> {
        let resp = self
            .execute(
                Method::Put,
                self.url_checked(path, scope)?,
                Some(body.clone()),
                self.write_timeout,
            )
            .await?;
        resp.json()
    }

    pub async fn delete(&self, path: &str, scope: Scope) -> Result<()> {
        self.execute(Method::Delete, self.url_checked(path, scope)?, None, self.write_timeout)
            .await?;
        Ok(())
    }

    /// Signed urls carry their own authorization.
    pub async fn download(&self, url: &str) -> Result<Bytes> {
        self.transport
            .download(url, self.transfer_timeout)
            .await
            .with_context(|| format!("downloading {}", strip_query(url)))
    }

    pub async fn upload(
        &self,
        url: &str,
        fields: serde_json::Map<String, Value>,
        file: Bytes,
    ) -> Result<()> {
        self.transport
            .upload(UploadForm {
                url: url.to_string(),
                fields,
                file,
                timeout: self.transfer_timeout,
            })
            .await
            .with_context(|| format!("uploading to {}", strip_query(url)))
    }

    pub async fn workspaces(&self) -> Result<Vec<Workspace>> {
        self.get_list("/workspaces/", Scope::Tenant).await
    }

    /// A number is taken as the id itself; anything else is looked up by name,
    /// ignoring case.
    pub async fn resolve_workspace(&self, id_or_name: &str) -> Result<WorkspaceId> {
        let id_or_name = id_or_name.trim();
        if let Ok(id) = id_or_name.parse::<i64>() {
            return Ok(WorkspaceId(id));
        }
        let workspaces = self.workspaces().await?;
        match workspaces
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(id_or_name))
        {
            Some(workspace) => Ok(workspace.id),
            None => {
                let names: Vec<&str> = workspaces.iter().map(|w| w.name.as_str()).collect();
                client_bail!(
                    "no workspace named '{id_or_name}' on {}; available: {}",
                    self.domain,
                    names.join(", ")
                )
            }
        }
    }

    fn url(&self, path: &str, scope: Scope) -> String {
        match scope {
            Scope::Workspace(id) => format!("{}/workspaces/{id}{path}", self.base_url),
            Scope::Tenant => format!("{}{path}", self.base_url),
        }
    }

    fn url_checked(&self, path: &str, scope: Scope) -> Result<String> {
        if !path.starts_with('/') {
            client_bail!("API path must start with '/': {path}");
        }
        Ok(self.url(path, scope))
    }

    fn access_token(&self) -> String {
        self.tokens.lock().unwrap().access.clone()
    }

    fn store_tokens(&self, tokens: TokenResponse) {
        let mut held = self.tokens.lock().unwrap();
        held.access = tokens.access_token;
        if tokens.refresh_token.is_some() {
            held.refresh = tokens.refresh_token;
        }
    }

    async fn token_grant(&self, body: Value) -> Result<TokenResponse> {
        let url = self.url("/o/token/", Scope::Tenant);
        let resp = self
            .transport
            .send(ApiRequest {
                method: Method::Post,
                url: url.clone(),
                bearer: None,
                body: Some(body),
                timeout: self.read_timeout,
            })
            .await?;
        if !resp.is_success() {
            return Err(resp.into_error(url));
        }
        resp.json()
    }

    /// `false` when there is no refresh token to use.
    async fn refresh(&self) -> Result<bool> {
        let Some(refresh_token) = self.tokens.lock().unwrap().refresh.clone() else {
            return Ok(false);
        };
        debug!("Access token expired, refreshing");
        let tokens = self
            .token_grant(json!({
                "client_id": self.client_id,
                "refresh_token": refresh_token,
                "grant_type": "refresh_token",
            }))
            .await
            .context("refreshing access token")?;
        self.store_tokens(tokens);
        Ok(true)
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: &Option<Value>,
        timeout: Duration,
    ) -> Result<ApiResponse> {
        self.transport
            .send(ApiRequest {
                method,
                url: url.to_string(),
                bearer: Some(self.access_token()),
                body: body.clone(),
                timeout,
            })
            .await
    }

    async fn execute(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<ApiResponse> {
        trace!("{method:?} {url}");
        let mut resp = self.send_once(method, &url, &body, timeout).await?;
        if resp.status == StatusCode::UNAUTHORIZED && self.refresh().await? {
            resp = self.send_once(method, &url, &body, timeout).await?;
        }
        if !resp.is_success() {
            return Err(resp.into_error(url));
        }
        Ok(resp)
    }
}
