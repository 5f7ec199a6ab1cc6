pub mod endpoint;
pub mod error;
pub mod response;

use crate::model::{Credentials, PvsConfig};
pub use error::Error;
use reqwest::{Method, Response};
use response::InstanceRecords;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Session cookies by name.
pub type CookieJar = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct Session {
    cookies: CookieJar,
    last_auth_time: Option<Instant>,
}

/// Where a logical request stands in the login-then-retry-once protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    /// Using a cookie from an earlier login.
    Session,
    /// A login was performed for this request; another rejection is final.
    FreshLogin,
}

enum Outcome {
    Payload(Value),
    Unauthenticated(String),
}

/// Authenticated HTTP session with the PVS varserver.
pub struct PvsClient {
    pvs_url: String,
    credentials: Credentials,
    client: reqwest::Client,
    session: RwLock<Session>,
}

fn normalize_host(host: &str) -> Result<String, Error> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(Error::Config("PVS host is empty".into()));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        Ok(host.to_owned())
    } else {
        Ok(format!("http://{}", host))
    }
}

/// Map transport-level failure to Error
fn map_transport_err(error: reqwest::Error) -> Error {
    Error::Connectivity(error.to_string())
}

/// Session cookies sent back by a login response.
fn extract_cookies(response: &Response) -> Result<CookieJar, Error> {
    let cookies: CookieJar = response
        .cookies()
        .map(|cookie| (cookie.name().to_owned(), cookie.value().to_owned()))
        .collect();

    if cookies.is_empty() {
        Err(Error::Authentication(format!(
            "no session cookie received (server responded {})",
            response.status()
        )))
    } else {
        Ok(cookies)
    }
}

/// The variable path a request asked for, or the endpoint when it names none.
fn request_target(endpoint: &endpoint::Endpoint, params: &[(&str, &str)]) -> String {
    params
        .iter()
        .find(|(key, _)| matches!(*key, "match" | "name"))
        .map(|(_, path)| (*path).to_owned())
        .unwrap_or_else(|| endpoint.to_owned())
}

fn cookie_header(cookies: &CookieJar) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

impl PvsClient {
    /// Configure the target and identity. No network I/O happens here.
    pub fn new(host: &str, credentials: Credentials, timeout: Duration) -> Result<Self, Error> {
        let pvs_url = normalize_host(host)?;
        /* PVS serves a self-signed certificate over https */
        let client = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(PvsClient {
            pvs_url,
            credentials,
            client,
            session: RwLock::new(Session::default()),
        })
    }

    pub fn from_config(config: &PvsConfig) -> Result<Self, Error> {
        PvsClient::new(
            &config.host,
            config.credentials()?,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn pvs_url(&self) -> &str {
        &self.pvs_url
    }

    /// Copy of the cookies of the current session.
    pub async fn cookies(&self) -> CookieJar {
        self.session.read().await.cookies.clone()
    }

    pub async fn last_auth_time(&self) -> Option<Instant> {
        self.session.read().await.last_auth_time
    }

    /// Basic-auth login. The cookies received replace the stored ones entirely.
    pub async fn login(&self) -> Result<(), Error> {
        let url = format!("{}{}", self.pvs_url, endpoint::LOGIN);
        log::debug!("logging in to {} as {}", self.pvs_url, self.credentials.username);

        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(map_transport_err)?;

        if !response.status().is_success() {
            return Err(Error::Authentication(format!(
                "login rejected (server responded {})",
                response.status()
            )));
        }

        let cookies = extract_cookies(&response)?;
        /* Swap under a single write lock so readers see either the old or the new session */
        *self.session.write().await = Session {
            cookies,
            last_auth_time: Some(Instant::now()),
        };
        Ok(())
    }

    /// End the session on the PVS and forget the cookies.
    pub async fn logout(&self) -> Result<(), Error> {
        let url = format!("{}{}", self.pvs_url, endpoint::LOGOUT);
        let cookies = self.cookies().await;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::COOKIE, cookie_header(&cookies))
            .send()
            .await
            .map_err(map_transport_err);

        *self.session.write().await = Session::default();

        let response = response?;
        if !response.status().is_success() {
            log::warn!("logout answered with {}", response.status());
        }
        Ok(())
    }

    async fn execute(
        &self,
        method: &Method,
        endpoint: &endpoint::Endpoint,
        params: &[(&str, &str)],
    ) -> Result<Outcome, Error> {
        let url = format!("{}{}", self.pvs_url, endpoint);
        let cookies = self.cookies().await;

        let mut request = self.client.request(method.clone(), url).query(params);
        if !cookies.is_empty() {
            request = request.header(reqwest::header::COOKIE, cookie_header(&cookies));
        }

        let response = request.send().await.map_err(map_transport_err)?;

        let status = response.status();
        match status {
            http::StatusCode::UNAUTHORIZED | http::StatusCode::FORBIDDEN => {
                return Ok(Outcome::Unauthenticated(format!("server responded {}", status)))
            }
            s if !s.is_success() => {
                return Err(Error::Protocol {
                    status: s.as_u16(),
                    path: request_target(endpoint, params),
                })
            }
            _ => {}
        }

        let body = response.text().await.map_err(map_transport_err)?;
        log::trace!("endpoint: {}, params: {:?}, response_text: {}", endpoint, params, body);

        let value = response::parse_body(&body)?;
        if response::is_not_logged_in(&value) {
            Ok(Outcome::Unauthenticated(value.to_string()))
        } else {
            Ok(Outcome::Payload(value))
        }
    }

    /// Issue a request, logging in first when there is no session and at most once more
    /// when the PVS reports the session as expired.
    pub async fn send_request(
        &self,
        method: Method,
        endpoint: &endpoint::Endpoint,
        params: &[(&str, &str)],
    ) -> Result<Value, Error> {
        let has_session = !self.session.read().await.cookies.is_empty();
        let mut state = if has_session {
            AuthState::Session
        } else {
            self.login().await?;
            AuthState::FreshLogin
        };

        loop {
            match self.execute(&method, endpoint, params).await? {
                Outcome::Payload(value) => return Ok(value),
                Outcome::Unauthenticated(reason) => match state {
                    AuthState::Session => {
                        log::debug!("session expired ({}), logging in again", reason);
                        self.login().await?;
                        state = AuthState::FreshLogin;
                    }
                    AuthState::FreshLogin => {
                        return Err(Error::Authentication(format!(
                            "still unauthenticated after login: {}",
                            reason
                        )))
                    }
                },
            }
        }
    }

    /// Read a single variable, e.g. `/sys/info/uptime`.
    pub async fn get_var(&self, name: &endpoint::VarPath) -> Result<Value, Error> {
        let value = self
            .send_request(Method::POST, endpoint::VARS, &[("name", name)])
            .await?;
        response::single_value(name, value)
    }

    /// Read every variable under `prefix`, grouped per device instance.
    pub async fn match_vars(&self, prefix: &endpoint::VarPath) -> Result<InstanceRecords, Error> {
        let value = self
            .send_request(
                Method::POST,
                endpoint::VARS,
                &[("match", prefix), ("fmt", "obj")],
            )
            .await?;
        response::instance_records(prefix, value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_gets_default_scheme() {
        assert_eq!("http://192.168.1.10", normalize_host("192.168.1.10").unwrap());
        assert_eq!("https://pvs.local", normalize_host("https://pvs.local/").unwrap());
        assert!(matches!(normalize_host("  "), Err(Error::Config(_))));
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let mut cookies = CookieJar::new();
        cookies.insert("session".into(), "abc".into());
        cookies.insert("csrf".into(), "xyz".into());
        assert_eq!("csrf=xyz; session=abc", cookie_header(&cookies));
    }

    #[test]
    fn protocol_errors_name_the_queried_path() {
        let params = [("match", "/sys/devices/meter/"), ("fmt", "obj")];
        assert_eq!("/sys/devices/meter/", request_target(endpoint::VARS, &params));
        assert_eq!("/vars", request_target(endpoint::VARS, &[]));
    }

    #[test]
    fn construction_does_no_io() {
        let credentials = Credentials::new("ssm_owner".into(), "A1072".into());
        let client = PvsClient::new("10.255.255.1", credentials, Duration::from_secs(1)).unwrap();
        assert_eq!("http://10.255.255.1", client.pvs_url());
    }
}
