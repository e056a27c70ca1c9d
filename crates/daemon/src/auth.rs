//! Password sign-in and token refresh against the identity provider.

use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const VERIFY_PASSWORD_URL: &str = "https://www.googleapis.com/identitytoolkit/v3/relyingparty/verifyPassword";
const REFRESH_URL: &str = "https://securetoken.googleapis.com/v1/token";

const CLIENT_VERSION: &str = "iOS/FirebaseSDK/10.20.0/FirebaseCore-iOS";
const BUNDLE_ID: &str = "com.dahlsjoo.shinner";
const AUTH_USER_AGENT: &str = "FirebaseAuth.iOS/10.20.0 com.dahlsjoo.shinner/1.9.0 iPhone/17.5.1 hw/iPhone15_4";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
const DEFAULT_LIFETIME_SECS: u64 = 3600;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    client_type: &'a str,
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    refresh_token: String,
    local_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    user_id: String,
}

/// A signed-in account: bearer token plus what is needed to renew it.
#[derive(Clone)]
pub struct Session {
    pub id_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub expires_at: Instant,
}

impl Session {
    fn from_refresh(resp: RefreshResponse, now: Instant) -> Self {
        Self {
            expires_at: now + Duration::from_secs(lifetime_secs(resp.expires_in.as_deref())),
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
            user_id: resp.user_id,
        }
    }

    /// True once `now` is within the refresh margin of expiry.
    pub fn needs_refresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN >= self.expires_at
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// `expires_in` arrives as a decimal string of seconds.
fn lifetime_secs(expires_in: Option<&str>) -> u64 {
    expires_in
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_LIFETIME_SECS)
}

#[derive(Clone)]
pub struct IdentityProvider {
    http: Client,
    api_key: String,
}

impl IdentityProvider {
    pub fn new(http: Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }

    /// Signs in with email and password, then exchanges the refresh token
    /// for a fresh bearer token.
    pub async fn login(&self, email: &str, password: &str) -> anyhow::Result<Session> {
        let body = LoginRequest {
            client_type: "CLIENT_TYPE_IOS",
            email,
            password,
            return_secure_token: true,
        };
        let url = format!("{VERIFY_PASSWORD_URL}?key={}", self.api_key);
        let resp = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("send login request")?;
        if !resp.status().is_success() {
            bail!("login request failed with status {}", resp.status());
        }
        let login: LoginResponse = resp.json().await.context("decode login response")?;
        debug!(local_id = %login.local_id, "password sign-in accepted");

        let session = self.refresh(&login.refresh_token).await?;
        info!(user_id = %session.user_id, "logged in");
        Ok(session)
    }

    pub async fn refresh(&self, refresh_token: &str) -> anyhow::Result<Session> {
        let body = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token,
        };
        let url = format!("{REFRESH_URL}?key={}", self.api_key);
        let resp = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("send token refresh request")?;
        if !resp.status().is_success() {
            bail!("token refresh failed with status {}", resp.status());
        }
        let refreshed: RefreshResponse = resp.json().await.context("decode token refresh response")?;
        debug!("bearer token refreshed");
        Ok(Session::from_refresh(refreshed, Instant::now()))
    }

    fn post(&self, url: &str) -> RequestBuilder {
        self.http
            .post(url)
            .header("x-client-version", CLIENT_VERSION)
            .header("x-ios-bundle-identifier", BUNDLE_ID)
            .header("accept-language", "en")
            .header(reqwest::header::USER_AGENT, AUTH_USER_AGENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_response_maps_to_a_session() {
        let resp: RefreshResponse = serde_json::from_str(
            r#"{"access_token":"a","expires_in":"3600","id_token":"tok","project_id":"p",
                "refresh_token":"r2","token_type":"Bearer","user_id":"u1"}"#,
        )
        .unwrap();
        let now = Instant::now();
        let session = Session::from_refresh(resp, now);
        assert_eq!(session.id_token, "tok");
        assert_eq!(session.refresh_token, "r2");
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.expires_at, now + Duration::from_secs(3600));
    }

    #[test]
    fn refresh_is_due_inside_the_margin() {
        let now = Instant::now();
        let session = Session {
            id_token: "t".into(),
            refresh_token: "r".into(),
            user_id: "u".into(),
            expires_at: now + Duration::from_secs(3600),
        };
        assert!(!session.needs_refresh(now));
        assert!(!session.needs_refresh(now + Duration::from_secs(3600 - 301)));
        assert!(session.needs_refresh(now + Duration::from_secs(3600 - 300)));
        assert!(session.needs_refresh(now + Duration::from_secs(4000)));
    }

    #[test]
    fn malformed_lifetime_falls_back_to_an_hour() {
        assert_eq!(lifetime_secs(Some(" 120 ")), 120);
        assert_eq!(lifetime_secs(Some("soon")), DEFAULT_LIFETIME_SECS);
        assert_eq!(lifetime_secs(None), DEFAULT_LIFETIME_SECS);
    }

    #[test]
    fn login_request_uses_camel_case_fields() {
        let body = serde_json::to_value(LoginRequest {
            client_type: "CLIENT_TYPE_IOS",
            email: "e",
            password: "p",
            return_secure_token: true,
        })
        .unwrap();
        assert_eq!(body["clientType"], "CLIENT_TYPE_IOS");
        assert_eq!(body["returnSecureToken"], true);
    }

    #[test]
    fn debug_hides_tokens() {
        let session = Session {
            id_token: "secret-token".into(),
            refresh_token: "secret-refresh".into(),
            user_id: "u".into(),
            expires_at: Instant::now(),
        };
        let dbg = format!("{session:?}");
        assert!(!dbg.contains("secret"));
    }
}
