use std::{fmt, time::Duration};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::{
    config::Config,
    error::{CalilError, CalilResult, MalformedReason},
};

mod models;

pub use models::{
    AvailabilityResult, AvailabilityStatus, CheckStatus, LendingState, LibraryBranch,
};

pub const DEFAULT_BASE_URL: &str = "https://api.calil.jp";

const BODY_SNIPPET_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// GET /library
    Library,
    /// GET /check, for both the first query and its continuations
    Check,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Library => "/library",
            Endpoint::Check => "/check",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Clone, Debug)]
pub struct CalilClient {
    base_url: String,
    app_key: String,
    timeout: Option<Duration>,
    client: reqwest::Client,
}

impl CalilClient {
    /// Create a client against the public service using the given application key.
    /// An empty key is accepted; the service rejects calls made with it.
    pub fn new(app_key: impl Into<String>) -> CalilResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CalilError::Client)?;
        let app_key = app_key.into();
        tracing::debug!(has_app_key = !app_key.is_empty(), "creating CalilClient");
        Ok(CalilClient {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_key,
            timeout: None,
            client,
        })
    }

    pub fn from_config(config: &Config) -> CalilResult<Self> {
        let client = CalilClient::new(&config.app_key)?.with_base_url(&config.base_url);
        Ok(match config.timeout {
            Some(timeout) => client.with_timeout(timeout),
            None => client,
        })
    }

    /// Return a client talking to another host (e.g. a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Return a client whose requests fail with [`CalilError::Timeout`] after `timeout`.
    ///
    /// Cloning is cheap, so `client.clone().with_timeout(d)` bounds a single call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return a client issuing its requests through `client`, e.g. to share a
    /// connection pool or carry proxy and TLS settings.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn has_app_key(&self) -> bool {
        !self.app_key.is_empty()
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    /// GET /library
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn search_libraries(&self, query: &LibraryQuery) -> CalilResult<Vec<LibraryBranch>> {
        let params = query.to_params(&self.app_key);
        let (status, body) = self.get(Endpoint::Library, &params).await?;
        let libs: Vec<LibraryBranch> = decode(Endpoint::Library, status, body.as_bytes(), &body)?;
        tracing::debug!(count = libs.len(), "found libraries");
        Ok(libs)
    }

    /// GET /check
    ///
    /// `isbn` and `system_ids` may each hold several comma-separated values.
    /// When the returned result is still in progress, pass its session to
    /// [`CalilClient::continue_check`] after a short wait.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn check_availability(
        &self,
        isbn: &str,
        system_ids: &str,
    ) -> CalilResult<AvailabilityResult> {
        let mut params = vec![
            ("appkey", self.app_key.clone()),
            ("isbn", isbn.to_string()),
            ("systemid", system_ids.to_string()),
        ];
        push_format(&mut params);
        self.check(&params).await
    }

    /// GET /check?session=...
    ///
    /// Valid for completed sessions too; it then returns the final result again.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn continue_check(&self, session: &str) -> CalilResult<AvailabilityResult> {
        let mut params = vec![
            ("appkey", self.app_key.clone()),
            ("session", session.to_string()),
        ];
        push_format(&mut params);
        self.check(&params).await
    }

    async fn check(&self, params: &[(&'static str, String)]) -> CalilResult<AvailabilityResult> {
        let (status, body) = self.get(Endpoint::Check, params).await?;
        let json = unwrap_envelope(body.as_bytes()).map_err(|reason| {
            tracing::error!(error = %reason, body_snippet = %snippet(&body), "failed to unwrap check response");
            CalilError::malformed(Endpoint::Check, reason)
        })?;
        let result: AvailabilityResult = decode(Endpoint::Check, status, json, &body)?;
        tracing::debug!(
            session = %result.session,
            in_progress = result.in_progress,
            books = result.books.len(),
            "availability result"
        );
        Ok(result)
    }

    /// Issue one GET and read the whole body. The response is dropped before returning.
    async fn get(
        &self,
        endpoint: Endpoint,
        params: &[(&'static str, String)],
    ) -> CalilResult<(StatusCode, String)> {
        // query string is left out of the log, it carries the app key
        let url = self.url(endpoint);
        tracing::debug!(%url, "GET");
        let mut req = self.client.get(&url).query(params);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| CalilError::transport(endpoint, e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CalilError::transport(endpoint, e))?;
        if !status.is_success() {
            tracing::warn!(%status, %endpoint, body_snippet = %snippet(&body), "request rejected");
            return Err(CalilError::Remote {
                endpoint,
                status: status.as_u16(),
                message: snippet(body.trim()).to_string(),
            });
        }
        Ok((status, body))
    }
}

/// Filters for GET /library. Empty values are not sent.
///
/// At least one of prefecture, system id or geocode should be set; the
/// service returns no libraries otherwise. `city` only narrows a prefecture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryQuery {
    pub prefecture: Option<String>,
    pub city: Option<String>,
    pub system_id: Option<String>,
    /// "longitude,latitude"
    pub geocode: Option<String>,
    /// 0 leaves the cap to the service.
    pub limit: Option<u32>,
}

impl LibraryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefecture(mut self, pref: impl Into<String>) -> Self {
        self.prefecture = Some(pref.into());
        self
    }

    pub fn city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn geocode(mut self, geocode: impl Into<String>) -> Self {
        self.geocode = Some(geocode.into());
        self
    }

    pub fn geocode_at(self, longitude: f64, latitude: f64) -> Self {
        self.geocode(format!("{},{}", longitude, latitude))
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_params(&self, app_key: &str) -> Vec<(&'static str, String)> {
        let mut q = vec![("appkey", app_key.to_string())];
        let filters = [
            ("pref", &self.prefecture),
            ("city", &self.city),
            ("systemid", &self.system_id),
            ("geocode", &self.geocode),
        ];
        for (key, value) in filters {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                q.push((key, v.to_string()));
            }
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            q.push(("limit", limit.to_string()));
        }
        push_format(&mut q);
        q
    }
}

/// `callback` must be present and empty, otherwise the service wraps the payload in a named JSONP call.
fn push_format(q: &mut Vec<(&'static str, String)>) {
    q.push(("format", "json".to_string()));
    q.push(("callback", String::new()));
}

/// Strip the `(` ... `);` wrapper GET /check puts around its JSON: drop the
/// first byte and the last two.
pub fn unwrap_envelope(body: &[u8]) -> Result<&[u8], MalformedReason> {
    if body.len() < 3 {
        return Err(MalformedReason::TooShort(body.len()));
    }
    Ok(&body[1..body.len() - 2])
}

fn decode<T: DeserializeOwned>(
    endpoint: Endpoint,
    status: StatusCode,
    json: &[u8],
    raw: &str,
) -> CalilResult<T> {
    let parsed = serde_json::from_slice::<serde_json::Value>(json).and_then(|value| {
        match remote_error_message(&value) {
            Some(message) => Ok(Err(message)),
            None => serde_json::from_value::<T>(value).map(Ok),
        }
    });
    match parsed {
        Ok(Ok(parsed)) => Ok(parsed),
        Ok(Err(message)) => {
            tracing::warn!(%endpoint, %message, "service reported an error");
            Err(CalilError::Remote {
                endpoint,
                status: status.as_u16(),
                message,
            })
        }
        Err(e) => {
            tracing::error!(error = %e, %endpoint, body_snippet = %snippet(raw), "failed to parse response");
            Err(CalilError::malformed(endpoint, e))
        }
    }
}

/// An object carrying `error` or `message` in place of the expected payload.
fn remote_error_message(value: &serde_json::Value) -> Option<String> {
    let obj = value.as_object()?;
    let msg = obj.get("error").or_else(|| obj.get("message"))?;
    Some(match msg.as_str() {
        Some(s) => s.to_string(),
        None => msg.to_string(),
    })
}

fn snippet(body: &str) -> &str {
    if body.len() <= BODY_SNIPPET_LEN {
        return body;
    }
    let mut end = BODY_SNIPPET_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    const CHECK_BODY: &str = r#"({"session": "a1b2c3", "books": {"4834000826": {"Aomori_Pref": {"status": "OK", "reserveurl": "https://example.org/reserve/4834000826", "libkey": {"県立図書館": "貸出可"}}}}, "continue": 0});"#;

    fn client_for(server: &mockito::Server) -> CalilClient {
        CalilClient::new("test-key").unwrap().with_base_url(server.url())
    }

    fn query_value<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn unwrap_envelope_is_exact() {
        let json = r#"{"session":"x","continue":0}"#;
        let body = format!("({});", json);
        assert_eq!(unwrap_envelope(body.as_bytes()).unwrap(), json.as_bytes());
    }

    #[test]
    fn unwrap_envelope_rejects_short_bodies() {
        for body in ["", "(", ");"] {
            match unwrap_envelope(body.as_bytes()) {
                Err(MalformedReason::TooShort(n)) => assert_eq!(n, body.len()),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(unwrap_envelope(b"();").unwrap(), b"");
    }

    #[test]
    fn empty_filters_are_omitted() {
        let q = LibraryQuery::new()
            .prefecture("京都府")
            .city("")
            .limit(0)
            .to_params("k");
        let keys: Vec<&str> = q.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["appkey", "pref", "format", "callback"]);
        assert_eq!(query_value(&q, "pref"), Some("京都府"));
        assert_eq!(query_value(&q, "callback"), Some(""));
    }

    #[test]
    fn all_filters_are_sent() {
        let q = LibraryQuery::new()
            .prefecture("青森県")
            .city("青森市")
            .system_id("Aomori_Pref")
            .geocode_at(136.7163027, 35.390516)
            .limit(5)
            .to_params("k");
        assert_eq!(query_value(&q, "appkey"), Some("k"));
        assert_eq!(query_value(&q, "city"), Some("青森市"));
        assert_eq!(query_value(&q, "systemid"), Some("Aomori_Pref"));
        assert_eq!(query_value(&q, "geocode"), Some("136.7163027,35.390516"));
        assert_eq!(query_value(&q, "limit"), Some("5"));
        assert_eq!(query_value(&q, "format"), Some("json"));
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let body = "図".repeat(1000);
        let s = snippet(&body);
        assert!(s.len() <= BODY_SNIPPET_LEN);
        assert!(s.chars().all(|c| c == '図'));
    }

    #[tokio::test]
    async fn search_libraries_sends_filters_and_decodes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/library")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("appkey".into(), "test-key".into()),
                Matcher::UrlEncoded("pref".into(), "京都府".into()),
                Matcher::UrlEncoded("city".into(), "京都市".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
                Matcher::UrlEncoded("format".into(), "json".into()),
                Matcher::UrlEncoded("callback".into(), "".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"systemid": "Kyoto_Kyoto", "systemname": "京都府京都市", "libkey": "中央", "libid": "104688", "formal": "京都市中央図書館", "pref": "京都府", "city": "京都市"},
                    {"systemid": "Kyoto_Kyoto", "systemname": "京都府京都市", "libkey": "右京", "libid": "104689", "formal": "京都市右京中央図書館", "pref": "京都府", "city": "京都市"}
                ]"#,
            )
            .create_async()
            .await;

        let query = LibraryQuery::new().prefecture("京都府").city("京都市").limit(2);
        let libs = client_for(&server).search_libraries(&query).await.unwrap();

        assert_eq!(libs.len(), 2);
        assert_eq!(libs[1].lib_key, "右京");
        assert_eq!(libs[0].formal_name, "京都市中央図書館");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn search_libraries_reports_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/library")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = client_for(&server)
            .search_libraries(&LibraryQuery::new().system_id("Aomori_Pref"))
            .await
            .unwrap_err();
        match err {
            CalilError::Malformed {
                endpoint: Endpoint::Library,
                reason: MalformedReason::Json(_),
            } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_key_is_a_remote_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/library")
            .match_query(Matcher::UrlEncoded("appkey".into(), "".into()))
            .with_status(400)
            .with_body("appkey is required")
            .create_async()
            .await;

        let client = CalilClient::new("").unwrap().with_base_url(server.url());
        assert!(!client.has_app_key());
        let err = client
            .search_libraries(&LibraryQuery::new().prefecture("京都府"))
            .await
            .unwrap_err();
        assert!(err.is_remote());
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn error_object_in_payload_is_a_remote_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/check")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"({"error": "invalid appkey"});"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .check_availability("4834000826", "Aomori_Pref")
            .await
            .unwrap_err();
        match err {
            CalilError::Remote {
                endpoint: Endpoint::Check,
                status: 200,
                message,
            } => assert_eq!(message, "invalid appkey"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_availability_unwraps_and_decodes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/check")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("appkey".into(), "test-key".into()),
                Matcher::UrlEncoded("isbn".into(), "4834000826".into()),
                Matcher::UrlEncoded("systemid".into(), "Aomori_Pref".into()),
                Matcher::UrlEncoded("format".into(), "json".into()),
                Matcher::UrlEncoded("callback".into(), "".into()),
            ]))
            .with_status(200)
            .with_body(CHECK_BODY)
            .create_async()
            .await;

        let result = client_for(&server)
            .check_availability("4834000826", "Aomori_Pref")
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.session, "a1b2c3");
        let status = result.status("4834000826", "Aomori_Pref").unwrap();
        assert!(status.status.is_ready());
        assert_eq!(status.reserve_url, "https://example.org/reserve/4834000826");
        assert_eq!(status.lib_keys["県立図書館"], "貸出可");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn check_availability_rejects_truncated_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/check")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(");")
            .create_async()
            .await;

        let err = client_for(&server)
            .check_availability("4834000826", "Aomori_Pref")
            .await
            .unwrap_err();
        match err {
            CalilError::Malformed {
                endpoint: Endpoint::Check,
                reason: MalformedReason::TooShort(2),
            } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_availability_rejects_unwrapped_json() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/check")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"session": "x", "continue": 0}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .check_availability("4834000826", "Aomori_Pref")
            .await
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn continue_check_sends_session_without_isbn_or_system() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/check")
            .match_query(Matcher::Regex(
                "^appkey=test-key&session=a1b2c3&format=json&callback=$".into(),
            ))
            .with_status(200)
            .with_body(CHECK_BODY)
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server);
        let first = client.continue_check("a1b2c3").await.unwrap();
        let second = client.continue_check("a1b2c3").await.unwrap();

        assert_eq!(first, second);
        assert!(second.is_complete());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn requests_go_through_the_supplied_http_client() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/check")
            .match_query(Matcher::UrlEncoded("session".into(), "a1b2c3".into()))
            .match_header("user-agent", "shared-pool/1.0")
            .with_status(200)
            .with_body(CHECK_BODY)
            .create_async()
            .await;

        let http = reqwest::Client::builder()
            .user_agent("shared-pool/1.0")
            .build()
            .unwrap();
        let result = client_for(&server)
            .with_http_client(http)
            .continue_check("a1b2c3")
            .await
            .unwrap();

        assert_eq!(result.session, "a1b2c3");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let client = CalilClient::new("test-key")
            .unwrap()
            .with_base_url("http://127.0.0.1:1")
            .with_timeout(Duration::from_secs(5));
        let err = client.continue_check("a1b2c3").await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err:?}");
    }

    #[test]
    fn from_config_applies_base_url_and_timeout() {
        let config = Config {
            app_key: "k".into(),
            base_url: "http://localhost:8080/".into(),
            timeout: Some(Duration::from_secs(3)),
        };
        let client = CalilClient::from_config(&config).unwrap();
        assert_eq!(client.url(Endpoint::Library), "http://localhost:8080/library");
        assert_eq!(client.timeout, Some(Duration::from_secs(3)));
        assert!(client.has_app_key());
    }
}
