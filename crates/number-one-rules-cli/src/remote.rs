//! Remote sheet import over HTTP, tolerant of JSONP-wrapped payloads.
//!
//! Each request carries a `callback=<name>` query parameter. Names are unique
//! per request and held in a process-wide registry for exactly as long as the
//! request is in flight.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use number_one_rules_core::RulesError;
use serde_json::Value;
use tracing::{debug, info, warn};
use ulid::Ulid;

pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_CALLBACK_PREFIX: &str = "nor_sheet";
const MAX_CALLBACK_ATTEMPTS: usize = 8;
const ANTI_HIJACK_PREFIXES: [&str; 2] = ["/**/", ")]}'"];

#[derive(Debug, Clone)]
pub struct RemoteImportConfig {
    pub timeout: Duration,
    pub callback_prefix: String,
    pub user_agent: String,
}

impl Default for RemoteImportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            callback_prefix: DEFAULT_CALLBACK_PREFIX.to_string(),
            user_agent: format!("nor/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn callback_registry() -> &'static Mutex<HashSet<String>> {
    static REGISTRY: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Reports whether `name` is currently held by an in-flight request.
#[must_use]
pub fn is_callback_registered(name: &str) -> bool {
    callback_registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(name)
}

/// A registered callback name; dropping it releases the name.
#[derive(Debug)]
pub struct CallbackRegistration {
    name: String,
}

impl CallbackRegistration {
    /// Registers a fresh `<prefix>_<ulid>` name, retrying on collision.
    ///
    /// # Errors
    /// Returns [`RulesError::Remote`] when no free name is found.
    pub fn acquire(prefix: &str) -> Result<Self, RulesError> {
        for _ in 0..MAX_CALLBACK_ATTEMPTS {
            let name = format!("{prefix}_{}", Ulid::new().to_string().to_lowercase());
            let inserted = callback_registry()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.clone());
            if inserted {
                return Ok(Self { name });
            }
        }

        Err(RulesError::Remote(
            "could not allocate a unique callback name".to_string(),
        ))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        callback_registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

pub struct RemoteSheetFetcher {
    client: reqwest::Client,
    config: RemoteImportConfig,
}

impl RemoteSheetFetcher {
    /// # Errors
    /// Returns [`RulesError::Remote`] when the HTTP client cannot be built.
    pub fn new(config: RemoteImportConfig) -> Result<Self, RulesError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| RulesError::Remote(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    /// Fetches `url` and returns the row objects it carries.
    ///
    /// The callback registration is released on every exit path, including
    /// timeout.
    ///
    /// # Errors
    /// Returns [`RulesError::Remote`] on timeout, transport failure, a
    /// non-success status, or a payload that is not a row array.
    pub async fn fetch_rows(&self, url: &str) -> Result<Vec<Value>, RulesError> {
        let registration = CallbackRegistration::acquire(&self.config.callback_prefix)?;
        let started = Instant::now();
        debug!(url, callback = registration.name(), "fetching remote sheet");

        let body = match tokio::time::timeout(
            self.config.timeout,
            self.fetch_body(url, registration.name()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(url, timeout = ?self.config.timeout, "remote sheet fetch timed out");
                return Err(RulesError::Remote(format!(
                    "remote import timed out after {:?}",
                    self.config.timeout
                )));
            }
        };

        let rows = parse_sheet_payload(&body, registration.name())?;
        info!(
            url,
            rows = rows.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "fetched remote sheet"
        );
        Ok(rows)
    }

    async fn fetch_body(&self, url: &str, callback: &str) -> Result<String, RulesError> {
        let response = self
            .client
            .get(url)
            .query(&[("callback", callback)])
            .send()
            .await
            .map_err(|err| RulesError::Remote(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RulesError::Remote(format!(
                "remote import failed with HTTP {}",
                status.as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|err| RulesError::Remote(format!("failed to read response body: {err}")))
    }
}

/// Extracts the row array from a bare JSON or JSONP response body.
///
/// Accepted shapes, in order: a JSON array; `callback(<json>)` with an
/// optional trailing `;`; any text whose first `(` and last `)` enclose
/// valid JSON. An object with an array under `data` or `rows` stands for
/// that array.
///
/// # Errors
/// Returns [`RulesError::Remote`] when no shape yields a row array.
pub fn parse_sheet_payload(body: &str, callback: &str) -> Result<Vec<Value>, RulesError> {
    let text = strip_preamble(body);

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return rows_from_value(value);
    }

    if let Some(inner) = strip_callback(text, callback) {
        return rows_from_value(parse_json(inner)?);
    }

    match (text.find('('), text.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            rows_from_value(parse_json(&text[open + 1..close])?)
        }
        _ => Err(RulesError::Remote(
            "malformed remote payload: no JSON array or callback wrapper found".to_string(),
        )),
    }
}

fn strip_preamble(body: &str) -> &str {
    let mut text = body.trim_start_matches('\u{feff}').trim();
    loop {
        let Some(rest) = ANTI_HIJACK_PREFIXES
            .iter()
            .find_map(|prefix| text.strip_prefix(prefix))
        else {
            return text;
        };
        text = rest.trim_start();
    }
}

fn strip_callback<'a>(text: &'a str, callback: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(callback)?.trim_start().strip_prefix('(')?;
    let rest = rest.trim_end();
    let rest = rest.strip_suffix(';').unwrap_or(rest).trim_end();
    rest.strip_suffix(')')
}

fn parse_json(text: &str) -> Result<Value, RulesError> {
    serde_json::from_str(text)
        .map_err(|err| RulesError::Remote(format!("malformed remote payload: {err}")))
}

fn rows_from_value(value: Value) -> Result<Vec<Value>, RulesError> {
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut fields) => {
            for key in ["data", "rows"] {
                if let Some(Value::Array(rows)) = fields.remove(key) {
                    return Ok(rows);
                }
            }
            Err(RulesError::Remote(
                "malformed remote payload: object has no `data` or `rows` array".to_string(),
            ))
        }
        _ => Err(RulesError::Remote(
            "malformed remote payload: expected a JSON array".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    enum Reply {
        Respond(u16, fn(&str) -> String),
        Hang,
    }

    /// Serves one HTTP request and reports the callback name it carried.
    async fn serve_once(reply: Reply) -> (String, oneshot::Receiver<String>) {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(value) => value,
            Err(err) => panic!("failed to bind test listener: {err}"),
        };
        let addr = match listener.local_addr() {
            Ok(value) => value,
            Err(err) => panic!("failed to read listener address: {err}"),
        };
        let (callback_tx, callback_rx) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buffer = [0_u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                match socket.read(&mut buffer).await {
                    Ok(0) | Err(_) => return,
                    Ok(read) => request.extend_from_slice(&buffer[..read]),
                }
            }

            let request = String::from_utf8_lossy(&request).to_string();
            let callback = request
                .split_once("callback=")
                .map(|(_, rest)| {
                    rest.chars()
                        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
                        .collect::<String>()
                })
                .unwrap_or_default();
            let _ = callback_tx.send(callback.clone());

            match reply {
                Reply::Respond(status, body) => {
                    let body = body(&callback);
                    let response = format!(
                        "HTTP/1.1 {status} Test\r\nContent-Type: application/javascript\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        });

        (format!("http://{addr}/sheet"), callback_rx)
    }

    fn fetcher(timeout: Duration) -> RemoteSheetFetcher {
        let config = RemoteImportConfig {
            timeout,
            ..RemoteImportConfig::default()
        };
        match RemoteSheetFetcher::new(config) {
            Ok(value) => value,
            Err(err) => panic!("failed to build fetcher: {err}"),
        }
    }

    async fn received(callback_rx: oneshot::Receiver<String>) -> String {
        match callback_rx.await {
            Ok(value) => value,
            Err(err) => panic!("server never saw a request: {err}"),
        }
    }

    #[test]
    fn parses_bare_array() {
        let rows = parse_sheet_payload(r#"[{"title":"A"}]"#, "cb");
        assert_eq!(rows, Ok(vec![json!({"title": "A"})]));
    }

    #[test]
    fn parses_callback_wrapper_with_preamble() {
        let body = "\u{feff}/**/ cb_1([{\"title\":\"A\"},{\"title\":\"B\"}]);\n";
        let rows = parse_sheet_payload(body, "cb_1");
        assert_eq!(rows.map(|rows| rows.len()), Ok(2));
    }

    #[test]
    fn falls_back_to_outer_parentheses() {
        let body = "google.visualization.Query.setResponse({\"rows\":[{\"title\":\"A\"}]})";
        let rows = parse_sheet_payload(body, "unrelated");
        assert_eq!(rows, Ok(vec![json!({"title": "A"})]));
    }

    #[test]
    fn strips_anti_hijack_prefix() {
        let rows = parse_sheet_payload(")]}'\n{\"data\":[]}", "cb");
        assert_eq!(rows, Ok(Vec::new()));
    }

    #[test]
    fn rejects_payloads_without_rows() {
        for body in ["<html>oops</html>", "cb(not json)", "{\"title\":\"A\"}", "42"] {
            match parse_sheet_payload(body, "cb") {
                Err(RulesError::Remote(message)) => {
                    assert!(message.starts_with("malformed remote payload"), "{message}");
                }
                other => panic!("expected malformed payload error for {body:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn registration_is_released_on_drop() {
        let registration = match CallbackRegistration::acquire("test") {
            Ok(value) => value,
            Err(err) => panic!("failed to acquire callback: {err}"),
        };
        let name = registration.name().to_string();
        assert!(name.starts_with("test_"));
        assert!(is_callback_registered(&name));

        let other = match CallbackRegistration::acquire("test") {
            Ok(value) => value,
            Err(err) => panic!("failed to acquire callback: {err}"),
        };
        assert_ne!(other.name(), name);

        drop(registration);
        assert!(!is_callback_registered(&name));
        assert!(is_callback_registered(other.name()));
    }

    #[tokio::test]
    async fn fetches_jsonp_rows_and_releases_callback() {
        let (url, callback_rx) = serve_once(Reply::Respond(200, |callback| {
            format!("{callback}([{{\"Title\":\"Be kind\",\"Description\":\"Kindness\"}}]);")
        }))
        .await;

        let rows = fetcher(Duration::from_secs(5)).fetch_rows(&url).await;
        let callback = received(callback_rx).await;

        assert!(callback.starts_with("nor_sheet_"));
        assert_eq!(
            rows,
            Ok(vec![json!({"Title": "Be kind", "Description": "Kindness"})])
        );
        assert!(!is_callback_registered(&callback));
    }

    #[tokio::test]
    async fn http_errors_are_reported_with_status() {
        let (url, _callback_rx) =
            serve_once(Reply::Respond(503, |_| "unavailable".to_string())).await;

        let result = fetcher(Duration::from_secs(5)).fetch_rows(&url).await;

        assert_eq!(
            result,
            Err(RulesError::Remote(
                "remote import failed with HTTP 503".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn timeout_fails_and_releases_callback() {
        let (url, callback_rx) = serve_once(Reply::Hang).await;

        let result = fetcher(Duration::from_millis(200)).fetch_rows(&url).await;
        let callback = received(callback_rx).await;

        assert_eq!(
            result,
            Err(RulesError::Remote(
                "remote import timed out after 200ms".to_string()
            ))
        );
        assert!(!is_callback_registered(&callback));
    }
}
