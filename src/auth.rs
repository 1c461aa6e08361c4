//! OAuth2 access tokens for the warehouse.
//!
//! Credentials come from a named local profile (gcloud application-default or
//! per-account credential files), an explicit credential file, or a
//! service-account descriptor supplied directly, usually from the
//! `GCP_CREDENTIALS` section of the secrets file.

use crate::error::LoadError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A service-account descriptor, field names as in the JSON key file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServiceAccountKey {
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub private_key_id: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![BIGQUERY_SCOPE.to_string()]
}

/// Where warehouse credentials come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    Profile { name: String },
    /// An `authorized_user` or `service_account` JSON file.
    File { path: PathBuf },
    ServiceAccount(ServiceAccountKey),
}

/// Credential files found on disk for a profile.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialFile {
    AuthorizedUser(AuthorizedUser),
    ServiceAccount(ServiceAccountKey),
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct TokenProvider {
    http: reqwest::Client,
    source: CredentialSource,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, source: CredentialSource) -> Self {
        Self {
            http,
            source,
            cached: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Returns a bearer token, reusing the previous one until shortly before it expires.
    pub async fn access_token(&self) -> Result<String, LoadError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = match &self.source {
            CredentialSource::ServiceAccount(key) => self.exchange_assertion(key).await?,
            CredentialSource::Profile { name } => {
                let path = profile_path(name)?;
                log::debug!("using credential profile {} at {}", name, path.display());
                self.exchange_file(&path).await?
            }
            CredentialSource::File { path } => self.exchange_file(path).await?,
        };

        let value = response.access_token.clone();
        *cached = Some(CachedToken {
            value: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(value)
    }

    async fn exchange_file(&self, path: &Path) -> Result<TokenResponse, LoadError> {
        match read_credential_file(path).await? {
            CredentialFile::AuthorizedUser(user) => self.refresh(&user).await,
            CredentialFile::ServiceAccount(key) => self.exchange_assertion(&key).await,
        }
    }

    async fn exchange_assertion(&self, key: &ServiceAccountKey) -> Result<TokenResponse, LoadError> {
        let assertion = sign_assertion(key, unix_now())?;
        self.post_token(&key.token_uri, &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .await
    }

    async fn refresh(&self, user: &AuthorizedUser) -> Result<TokenResponse, LoadError> {
        self.post_token(
            &user.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
            ],
        )
        .await
    }

    async fn post_token(&self, uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse, LoadError> {
        let resp = self.http.post(uri).form(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LoadError::Auth(format!("token endpoint returned {}: {}", status, body)));
        }
        resp.json::<TokenResponse>()
            .await
            .map_err(|err| LoadError::Auth(format!("token response: {}", err)))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn claims(key: &ServiceAccountKey, now: u64) -> Claims<'_> {
    let scopes = if key.scopes.is_empty() {
        default_scopes()
    } else {
        key.scopes.clone()
    };
    Claims {
        iss: &key.client_email,
        scope: scopes.join(" "),
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    }
}

fn sign_assertion(key: &ServiceAccountKey, now: u64) -> Result<String, LoadError> {
    let mut header = Header::new(Algorithm::RS256);
    if !key.private_key_id.is_empty() {
        header.kid = Some(key.private_key_id.clone());
    }
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|err| LoadError::Auth(format!("private key for {}: {}", key.client_email, err)))?;
    jsonwebtoken::encode(&header, &claims(key, now), &encoding_key)
        .map_err(|err| LoadError::Auth(format!("sign assertion: {}", err)))
}

fn profile_path(name: &str) -> Result<PathBuf, LoadError> {
    if name == "default" {
        if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }
    let config = gcloud_config_dir()
        .ok_or_else(|| LoadError::Auth("no configuration directory for credential profiles".to_string()))?;
    Ok(profile_path_in(&config, name))
}

/// gcloud keeps its files under `%APPDATA%` on Windows and `~/.config` elsewhere,
/// macOS included.
#[cfg(windows)]
fn gcloud_config_dir() -> Option<PathBuf> {
    dirs::config_dir()
}

#[cfg(not(windows))]
fn gcloud_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config"))
}

fn profile_path_in(config_dir: &Path, name: &str) -> PathBuf {
    let gcloud = config_dir.join("gcloud");
    if name == "default" {
        gcloud.join("application_default_credentials.json")
    } else {
        gcloud.join("legacy_credentials").join(name).join("adc.json")
    }
}

async fn read_credential_file(path: &Path) -> Result<CredentialFile, LoadError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw)
        .map_err(|err| LoadError::Auth(format!("credential file {}: {}", path.display(), err)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes an `authorized_user` file that refreshes against `token_uri`.
    pub(crate) fn authorized_user_file(dir: &Path, token_uri: &str) -> PathBuf {
        let path = dir.join("adc.json");
        let body = serde_json::json!({
            "type": "authorized_user",
            "client_id": "c",
            "client_secret": "s",
            "refresh_token": "r",
            "token_uri": token_uri,
        });
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    async fn token_endpoint(expires_in: u64) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/token",
            post(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Json(serde_json::json!({
                        "access_token": format!("tok-{}", n),
                        "expires_in": expires_in,
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}/token", addr), hits)
    }

    fn key() -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "dash@proj.iam.gserviceaccount.com".to_string(),
            client_id: "123".to_string(),
            private_key_id: "abc".to_string(),
            private_key: "not a key".to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            scopes: Vec::new(),
        }
    }

    #[test]
    fn claims_default_to_bigquery_scope() {
        let key = key();
        let claims = claims(&key, 1_000);
        assert_eq!(claims.iss, "dash@proj.iam.gserviceaccount.com");
        assert_eq!(claims.scope, BIGQUERY_SCOPE);
        assert_eq!(claims.aud, DEFAULT_TOKEN_URI);
        assert_eq!(claims.exp - claims.iat, ASSERTION_LIFETIME_SECS);
    }

    #[test]
    fn claims_join_custom_scopes() {
        let mut key = key();
        key.scopes = vec!["a".to_string(), "b".to_string()];
        assert_eq!(claims(&key, 0).scope, "a b");
    }

    #[test]
    fn invalid_private_key_is_an_auth_error() {
        assert!(matches!(sign_assertion(&key(), 0), Err(LoadError::Auth(_))));
    }

    #[test]
    fn profile_paths() {
        let base = Path::new("/home/u/.config");
        assert_eq!(
            profile_path_in(base, "default"),
            base.join("gcloud/application_default_credentials.json")
        );
        assert_eq!(
            profile_path_in(base, "me@example.com"),
            base.join("gcloud/legacy_credentials/me@example.com/adc.json")
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn gcloud_files_live_under_home_config() {
        let expected = dirs::home_dir().map(|home| home.join(".config"));
        assert_eq!(gcloud_config_dir(), expected);
    }

    #[tokio::test]
    async fn credential_files_are_tagged_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.json");
        std::fs::write(
            &user,
            r#"{"type":"authorized_user","client_id":"c","client_secret":"s","refresh_token":"r"}"#,
        )
        .unwrap();
        match read_credential_file(&user).await.unwrap() {
            CredentialFile::AuthorizedUser(u) => {
                assert_eq!(u.refresh_token, "r");
                assert_eq!(u.token_uri, DEFAULT_TOKEN_URI);
            }
            other => panic!("unexpected {:?}", other),
        }

        let sa = dir.path().join("sa.json");
        std::fs::write(
            &sa,
            r#"{"type":"service_account","client_email":"x@y","private_key":"k","project_id":"p"}"#,
        )
        .unwrap();
        assert!(matches!(
            read_credential_file(&sa).await.unwrap(),
            CredentialFile::ServiceAccount(k) if k.scopes == vec![BIGQUERY_SCOPE.to_string()]
        ));
    }

    #[tokio::test]
    async fn tokens_are_reused_until_near_expiry() {
        let (uri, hits) = token_endpoint(3600).await;
        let dir = tempfile::tempdir().unwrap();
        let path = authorized_user_file(dir.path(), &uri);
        let provider = TokenProvider::new(reqwest::Client::new(), CredentialSource::File { path });

        assert_eq!(provider.access_token().await.unwrap(), "tok-1");
        assert_eq!(provider.access_token().await.unwrap(), "tok-1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tokens_inside_the_expiry_margin_are_refreshed() {
        let (uri, hits) = token_endpoint(30).await;
        let dir = tempfile::tempdir().unwrap();
        let path = authorized_user_file(dir.path(), &uri);
        let provider = TokenProvider::new(reqwest::Client::new(), CredentialSource::File { path });

        assert_eq!(provider.access_token().await.unwrap(), "tok-1");
        assert_eq!(provider.access_token().await.unwrap(), "tok-2");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_credential_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let provider = TokenProvider::new(
            reqwest::Client::new(),
            CredentialSource::File { path: path.clone() },
        );
        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, LoadError::Io { path: ref p, .. } if p == &path));
    }
}
