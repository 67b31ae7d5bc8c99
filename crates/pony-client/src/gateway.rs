use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use pony_types::api::ErrorBody;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::SessionStore;

/// Whether a request needs the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Public,
    Protected,
}

/// The only way this crate talks to the server.
///
/// The token is read from the session on every call, never captured, so a
/// gateway built before login still authenticates afterwards.
#[derive(Clone)]
pub struct ApiGateway {
    http: Client,
    base_url: Url,
    session: Arc<SessionStore>,
}

impl ApiGateway {
    pub fn new(config: &ClientConfig, session: Arc<SessionStore>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.api_url.clone(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
        let response = self.send(Method::GET, path, Access::Protected, |b| b).await?;
        decode(response).await
    }

    pub async fn post<B, T>(&self, path: &[&str], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(Method::POST, path, Access::Protected, |b| b.json(body))
            .await?;
        decode(response).await
    }

    pub async fn put<B, T>(&self, path: &[&str], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(Method::PUT, path, Access::Protected, |b| b.json(body))
            .await?;
        decode(response).await
    }

    /// DELETE; any success body is ignored.
    pub async fn delete(&self, path: &[&str]) -> Result<()> {
        self.send(Method::DELETE, path, Access::Protected, |b| b)
            .await
            .map(|_| ())
    }

    /// Form-encoded POST to a public endpoint (the login exchange).
    pub async fn post_form<B, T>(&self, path: &[&str], form: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(Method::POST, path, Access::Public, |b| b.form(form))
            .await?;
        decode(response).await
    }

    /// Endpoint URL under the base address. Each segment is percent-encoded
    /// on its own, so an id can never reach another endpoint.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ClientError::Validation(format!("base URL {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<F>(
        &self,
        method: Method,
        segments: &[&str],
        access: Access,
        build: F,
    ) -> Result<Response>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(segments)?;
        let path = url.path().to_string();

        let token = match access {
            Access::Public => None,
            Access::Protected => match self.session.current_session().token() {
                Some(token) => Some(token.to_string()),
                None => {
                    debug!("{} {} refused: not logged in", method, path);
                    return Err(ClientError::not_authenticated());
                }
            },
        };

        let mut request = build(self.http.request(method.clone(), url));
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            debug!("{} {} failed without response: {}", method, path, e);
            ClientError::Network(e.to_string())
        })?;

        let status = response.status();
        debug!("{} {} -> {}", method, path, status.as_u16());

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let error = classify(status, body);
        if error.is_auth() {
            if let Some(token) = &token {
                self.session.expire(token);
            }
        }
        Err(error)
    }
}

/// Map a non-2xx response onto the error taxonomy.
fn classify(status: StatusCode, body: String) -> ClientError {
    match status {
        StatusCode::UNAUTHORIZED => {
            let description =
                ErrorBody::describe(&body).unwrap_or_else(|| "authentication required".into());
            ClientError::Auth(description)
        }
        StatusCode::NOT_FOUND => {
            let description = ErrorBody::describe(&body).unwrap_or(body);
            ClientError::NotFound(description)
        }
        _ => {
            warn!("Request failed with status {}", status.as_u16());
            ClientError::Api {
                status: status.as_u16(),
                body,
            }
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::Network(e.to_string()))?;

    // Empty bodies (204, bare 201) read as JSON null.
    let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &bytes
    };

    serde_json::from_slice(raw).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use crate::storage::MemoryTokenStore;

    #[test]
    fn classifies_statuses() {
        let auth = classify(
            StatusCode::UNAUTHORIZED,
            r#"{"detail":{"error":"invalid_client","error_description":"invalid credentials"}}"#.into(),
        );
        assert_eq!(auth, ClientError::Auth("invalid credentials".into()));
        assert_eq!(auth.to_string(), "invalid credentials");

        assert!(classify(StatusCode::NOT_FOUND, "gone".into()).is_not_found());

        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            ClientError::Api {
                status: 500,
                body: "boom".into()
            }
        );
    }

    fn gateway_at(base: &str) -> ApiGateway {
        let config = ClientConfig::new(Url::parse(base).unwrap());
        let session = SessionStore::restore(
            Arc::new(MemoryTokenStore::default()),
            QueryCache::new(config.stale_after),
        );
        ApiGateway::new(&config, Arc::new(session)).unwrap()
    }

    #[test]
    fn segments_are_encoded_one_by_one() {
        let gateway = gateway_at("http://127.0.0.1:8000");
        let url = gateway.url(&["chats", "7", "messages", "99/../../users/me"]).unwrap();
        assert_eq!(url.path(), "/chats/7/messages/99%2F..%2F..%2Fusers%2Fme");

        let url = gateway.url(&["chats", "..", "users"]).unwrap();
        assert_eq!(url.path(), "/chats/users");
    }

    #[test]
    fn base_path_is_kept() {
        for base in ["http://example.com/api", "http://example.com/api/"] {
            let url = gateway_at(base).url(&["auth", "token"]).unwrap();
            assert_eq!(url.as_str(), "http://example.com/api/auth/token");
        }
    }

    #[test]
    fn bare_401_gets_a_generic_description() {
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, String::new()),
            ClientError::Auth("authentication required".into())
        );
    }
}
