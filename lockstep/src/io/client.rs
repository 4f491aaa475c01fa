//! Typed HTTP calls to the lockstep service.
//!
//! Calls are synchronous and never retried: a failed report is surfaced to
//! the learner rather than risk recording the same regression twice.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::types::{Judged, ProtocolError, TestDescription, TestResult};
use crate::io::store::ChallengeSummary;

/// How long `auth/jwt` may block while the learner logs in through the browser.
pub const LOGIN_WAIT: Duration = Duration::from_secs(630);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid server URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("not logged in to {0}; run `lockstep login` first")]
    NotLoggedIn(String),
}

/// Attempt-scoped calls used while running tests.
///
/// Implemented by [`RemoteClient`]; tests substitute a scripted fake.
pub trait AttemptService {
    /// Ask the service to judge output for a test whose rule is withheld.
    fn check_output(
        &self,
        code: &str,
        test_name: &str,
        actual: &[String],
    ) -> Result<Judged, ClientError>;

    fn send_pass(&self, code: &str) -> Result<(), ClientError>;

    fn send_fail(&self, code: &str, test_name: &str, result: &TestResult)
    -> Result<(), ClientError>;

    /// Advance the attempt and fetch its next batch (expected output withheld).
    fn next_tests(&self, code: &str) -> Result<Vec<TestDescription>, ClientError>;
}

/// Credential handed back once the browser login completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginGrant {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct PreToken {
    token: String,
}

#[derive(Debug, Deserialize)]
struct AttemptCreated {
    aid: String,
}

pub struct RemoteClient {
    base_url: String,
    base: Url,
    jwt: Option<String>,
    http: Client,
}

impl RemoteClient {
    pub fn new(base_url: &str, jwt: Option<String>) -> Result<Self, ClientError> {
        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base = Url::parse(&base_url).map_err(|e| ClientError::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl {
                url: base_url,
                reason: "not a base URL".to_string(),
            });
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|source| ClientError::Http {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            base_url,
            base,
            jwt,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn login_url(&self, pre: &str) -> String {
        format!("{}auth/login?pre={pre}", self.base_url)
    }

    /// Endpoint under the base URL; each segment is percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn jwt(&self) -> Result<&str, ClientError> {
        self.jwt
            .as_deref()
            .ok_or_else(|| ClientError::NotLoggedIn(self.base_url.clone()))
    }

    #[instrument(skip(self, body), fields(base = %self.base_url))]
    fn post<T: DeserializeOwned>(
        &self,
        path: &[&str],
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<T, ClientError> {
        let url = self.url(path);
        let mut request = self.http.post(url.clone()).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().map_err(|source| ClientError::Http {
            url: url.to_string(),
            source,
        })?;
        decode(response)
    }

    #[instrument(skip(self), fields(base = %self.base_url))]
    pub fn list_challenges(&self) -> Result<Vec<ChallengeSummary>, ClientError> {
        let url = self.url(&["c.json"]);
        let response = self
            .http
            .get(url.clone())
            .send()
            .map_err(|source| ClientError::Http {
                url: url.to_string(),
                source,
            })?;
        decode(response)
    }

    pub fn pre_token(&self) -> Result<String, ClientError> {
        let pre: PreToken = self.post(&["auth", "pre"], &json!({}), None)?;
        Ok(pre.token)
    }

    /// Block until the browser login for `pre` completes.
    pub fn await_login(&self, pre: &str) -> Result<LoginGrant, ClientError> {
        match self.post(&["auth", "jwt"], &json!({ "pre": pre }), Some(LOGIN_WAIT)) {
            Err(ClientError::Protocol(ProtocolError::Status { status, .. })) => {
                Err(match StatusCode::from_u16(status) {
                    Ok(StatusCode::NOT_FOUND) => ProtocolError::UnknownPreToken,
                    Ok(StatusCode::CONFLICT) => ProtocolError::PreTokenAlreadyUsed,
                    _ => ProtocolError::LoginExpired,
                }
                .into())
            }
            other => other,
        }
    }

    /// Start an attempt on the named challenge; returns the attempt code.
    pub fn create_attempt(&self, challenge: &str) -> Result<String, ClientError> {
        let created: AttemptCreated = self.post(
            &["c", challenge, "attempt"],
            &json!({ "jwt": self.jwt()? }),
            None,
        )?;
        Ok(created.aid)
    }
}

impl AttemptService for RemoteClient {
    fn check_output(
        &self,
        code: &str,
        test_name: &str,
        actual: &[String],
    ) -> Result<Judged, ClientError> {
        let result: TestResult = self.post(
            &["a", code, "check", test_name],
            &json!({ "jwt": self.jwt()?, "actual": actual }),
            None,
        )?;
        debug!(test = test_name, pass = result.is_pass(), "server verdict");
        Ok(Judged::try_from(result)?)
    }

    fn send_pass(&self, code: &str) -> Result<(), ClientError> {
        let _: Value = self.post(
            &["a", code, "pass"],
            &json!({ "jwt": self.jwt()? }),
            None,
        )?;
        Ok(())
    }

    fn send_fail(
        &self,
        code: &str,
        test_name: &str,
        result: &TestResult,
    ) -> Result<(), ClientError> {
        let _: Value = self.post(
            &["a", code, "fail"],
            &json!({ "jwt": self.jwt()?, "test_name": test_name, "result": result }),
            None,
        )?;
        Ok(())
    }

    fn next_tests(&self, code: &str) -> Result<Vec<TestDescription>, ClientError> {
        self.post(
            &["a", code, "next"],
            &json!({ "jwt": self.jwt()? }),
            None,
        )
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    if !status.is_success() {
        return Err(ProtocolError::Status {
            status: status.as_u16(),
            body,
        }
        .into());
    }
    serde_json::from_str(&body).map_err(|e| ProtocolError::Decode(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = RemoteClient::new("http://example.test", None).expect("client");
        assert_eq!(client.base_url(), "http://example.test/");
        assert_eq!(
            client.url(&["a", "x", "next"]).as_str(),
            "http://example.test/a/x/next"
        );
        assert_eq!(
            client.login_url("PRE"),
            "http://example.test/auth/login?pre=PRE"
        );
    }

    #[test]
    fn path_segments_are_escaped() {
        let client = RemoteClient::new("http://example.test/prefix", None).expect("client");
        assert_eq!(
            client.url(&["a", "k", "check", "odd/name?#"]).as_str(),
            "http://example.test/prefix/a/k/check/odd%2Fname%3F%23"
        );
    }

    #[test]
    fn malformed_server_url_is_rejected() {
        assert!(matches!(
            RemoteClient::new("not a url", None),
            Err(ClientError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn challenge_list_decodes_service_json() {
        let body = serde_json::to_string(&vec![ChallengeSummary {
            name: "echo".to_string(),
            title: "Echo things".to_string(),
        }])
        .expect("serialize");
        let decoded: Vec<ChallengeSummary> = serde_json::from_str(&body).expect("decode");
        assert_eq!(decoded[0].name, "echo");
        assert_eq!(decoded[0].title, "Echo things");
    }

    #[test]
    fn attempt_calls_require_login() {
        let client = RemoteClient::new("http://example.test/", None).expect("client");
        let err = client.send_pass("code").expect_err("no jwt");
        assert!(matches!(err, ClientError::NotLoggedIn(_)));
    }
}
