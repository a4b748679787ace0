use crate::domain::model::{
    Account, AccountId, Profile, PublicAttendee, Registration, RegistrationOp, Session, Slot,
};
use crate::domain::ports::{DataService, IdentityProvider};
use crate::utils::error::{AuthError, RemoteError, Result, SignupError};
use crate::utils::validation::validate_url;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const PROFILE_COLUMNS: &str =
    "id,prenom,nom,telephone,taille_tshirt,repas_vendredi,repas_samedi";

/// Error body returned by the data service (`message`, `code`) or the
/// identity endpoint (`error_description`, `msg`).
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn text(self) -> Option<String> {
        self.message
            .or(self.error_description)
            .or(self.msg)
            .or(self.error)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: Account,
}

/// Client for a PostgREST data service and a GoTrue identity endpoint
/// behind the same base URL.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, anon_key: &str, request_timeout: Duration) -> Result<Self> {
        validate_url("service.base_url", base_url)?;
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(SignupError::HttpError)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
    ) -> std::result::Result<T, RemoteError> {
        let url = self.url(path);
        tracing::debug!("📡 GET {}", url);
        let response = self
            .authed(self.client.get(&url), session)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        session: &Session,
        function: &str,
        body: serde_json::Value,
    ) -> std::result::Result<T, RemoteError> {
        let url = self.url(&format!("/rest/v1/rpc/{}", function));
        tracing::debug!("📡 RPC {}", function);
        let response = self
            .authed(self.client.post(&url), session)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    RemoteError::new(error.to_string())
}

async fn remote_error(response: Response) -> RemoteError {
    let status = response.status();
    let raw = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&raw).unwrap_or_default();
    let code = body.code.clone();
    let message = body
        .text()
        .unwrap_or_else(|| if raw.is_empty() { status.to_string() } else { raw });

    let error = RemoteError::new(message).with_status(status.as_u16());
    match code {
        Some(code) => error.with_code(code),
        None => error,
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> std::result::Result<T, RemoteError> {
    if !response.status().is_success() {
        return Err(remote_error(response).await);
    }
    let status = response.status().as_u16();
    let raw = response.text().await.map_err(transport_error)?;
    // RPCs returning void answer with an empty body.
    let raw = if raw.trim().is_empty() { "null" } else { raw.as_str() };
    serde_json::from_str(raw).map_err(|e| {
        RemoteError::new(format!("Unexpected response body: {}", e)).with_status(status)
    })
}

#[async_trait]
impl DataService for HttpBackend {
    async fn fetch_slots(&self, session: &Session) -> std::result::Result<Vec<Slot>, RemoteError> {
        self.get_json(session, "/rest/v1/public_planning?select=*&order=periode_debut.asc")
            .await
    }

    async fn fetch_my_registrations(
        &self,
        session: &Session,
    ) -> std::result::Result<Vec<Registration>, RemoteError> {
        // Row-level security restricts the table to the caller's profiles.
        self.get_json(session, "/rest/v1/inscriptions?select=poste_id,benevole_id")
            .await
    }

    async fn fetch_profiles(&self, session: &Session) -> std::result::Result<Vec<Profile>, RemoteError> {
        let path = format!(
            "/rest/v1/benevoles?select={}&user_id=eq.{}&order=created_at.asc",
            PROFILE_COLUMNS, session.account.id
        );
        self.get_json(session, &path).await
    }

    async fn fetch_public_attendees(
        &self,
        session: &Session,
    ) -> std::result::Result<Vec<PublicAttendee>, RemoteError> {
        self.rpc(session, "get_public_inscriptions", json!({})).await
    }

    async fn apply_registration_batch(
        &self,
        session: &Session,
        ops: &[RegistrationOp],
    ) -> std::result::Result<(), RemoteError> {
        let body = json!({
            "target_user_id": session.account.id,
            "modifications": ops,
        });
        let _: serde_json::Value = self
            .rpc(session, "manage_inscriptions_transaction", body)
            .await?;
        Ok(())
    }

    async fn get_balance(
        &self,
        session: &Session,
        owner: &AccountId,
    ) -> std::result::Result<f64, RemoteError> {
        let balance: Option<f64> = self
            .rpc(session, "get_user_balance", json!({ "target_user_id": owner }))
            .await?;
        Ok(balance.unwrap_or(0.0))
    }
}

#[async_trait]
impl IdentityProvider for HttpBackend {
    async fn refresh_credential(&self, session: &Session) -> std::result::Result<Session, AuthError> {
        let url = self.url("/auth/v1/token?grant_type=refresh_token");
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": session.refresh_token }))
            .send()
            .await
            .map_err(|e| AuthError::Transport {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let error = remote_error(response).await;
            return Err(match error.status {
                Some(status) if status >= 500 => AuthError::Transport {
                    message: error.message,
                },
                _ => AuthError::Rejected {
                    message: error.message,
                },
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| AuthError::Rejected {
            message: format!("Malformed token response: {}", e),
        })?;
        Ok(Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
            account: token.user,
        })
    }

    async fn sign_out(&self, session: &Session) -> std::result::Result<(), AuthError> {
        let url = self.url("/auth/v1/logout");
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| AuthError::Transport {
                message: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AuthError::Rejected {
                message: remote_error(response).await.message,
            })
        }
    }
}
