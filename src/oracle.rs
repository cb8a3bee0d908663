//! Code-search frequency oracle.
//!
//! `GithubCodeSearch` performs one search request; `RetryingOracle` wraps any
//! `CodeSearch` with the retry policy: a politeness delay after every attempt,
//! a longer cooldown when the quota is exhausted, and a hard attempt ceiling.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const GITHUB_SEARCH_URL: &str = "https://api.github.com/search/code";
const USER_AGENT: &str = concat!("function-classifier/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request for {term:?} failed: {source}")]
    Http {
        term: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("code search returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("code search response has no total_count")]
    MissingCount,
    #[error("code search rate limit exhausted")]
    RateLimited,
    #[error("no frequency for {term:?} after {attempts} attempts: {last}")]
    Exhausted {
        term: String,
        attempts: u32,
        last: Box<OracleError>,
    },
}

/// Result of a single search request that reached the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Count(u64),
    RateLimited,
}

pub trait CodeSearch {
    fn search(&self, term: &str) -> Result<SearchOutcome, OracleError>;
}

pub trait FrequencyOracle {
    fn query(&mut self, term: &str) -> Result<u64, OracleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(6),
            cooldown: Duration::from_secs(60),
        }
    }
}

pub struct RetryingOracle<S> {
    search: S,
    policy: RetryPolicy,
    sleep: fn(Duration),
    queries: u64,
}

impl<S: CodeSearch> RetryingOracle<S> {
    pub fn new(search: S, policy: RetryPolicy) -> Self {
        Self::with_sleep(search, policy, std::thread::sleep)
    }

    pub fn with_sleep(search: S, policy: RetryPolicy, sleep: fn(Duration)) -> Self {
        Self {
            search,
            policy,
            sleep,
            queries: 0,
        }
    }

    /// Number of requests issued so far, retries included.
    pub fn queries(&self) -> u64 {
        self.queries
    }
}

impl<S: CodeSearch> FrequencyOracle for RetryingOracle<S> {
    fn query(&mut self, term: &str) -> Result<u64, OracleError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last = OracleError::MissingCount;

        for attempt in 1..=attempts {
            self.queries += 1;
            let outcome = self.search.search(term);
            (self.sleep)(self.policy.delay);

            match outcome {
                Ok(SearchOutcome::Count(count)) => {
                    tracing::debug!(term, count, attempt, "code search count");
                    return Ok(count);
                }
                Ok(SearchOutcome::RateLimited) => {
                    tracing::warn!(
                        term,
                        attempt,
                        cooldown_secs = self.policy.cooldown.as_secs(),
                        "code search rate limited, cooling down"
                    );
                    if attempt < attempts {
                        (self.sleep)(self.policy.cooldown);
                    }
                    last = OracleError::RateLimited;
                }
                Err(err) => {
                    tracing::debug!(term, attempt, error = %err, "code search attempt failed");
                    last = err;
                }
            }
        }

        Err(OracleError::Exhausted {
            term: term.to_string(),
            attempts,
            last: Box::new(last),
        })
    }
}

pub struct GithubCodeSearch {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: String,
    language: String,
}

impl GithubCodeSearch {
    pub fn new(token: String, language: String) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(
            client,
            GITHUB_SEARCH_URL.to_string(),
            token,
            language,
        ))
    }

    pub fn with_client(
        client: reqwest::blocking::Client,
        endpoint: String,
        token: String,
        language: String,
    ) -> Self {
        Self {
            client,
            endpoint,
            token,
            language,
        }
    }

    pub fn search_query(&self, term: &str) -> String {
        format!("{term} language:{}", self.language)
    }
}

impl CodeSearch for GithubCodeSearch {
    fn search(&self, term: &str) -> Result<SearchOutcome, OracleError> {
        let http_err = |source| OracleError::Http {
            term: term.to_string(),
            source,
        };

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", self.search_query(term)), ("per_page", "1".to_string())])
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(http_err)?;

        let status = response.status().as_u16();
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().map_err(http_err)?;

        parse_search_response(status, remaining, &body)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: Option<u64>,
}

/// Interprets one code-search reply.
///
/// A successful body carrying `total_count` wins even when the quota just hit
/// zero; the next request will see the limit. A 403 only counts as rate
/// limiting when the quota header is 0 or the message names a rate limit
/// (GitHub's secondary limits); other 403s are permission errors.
pub fn parse_search_response(
    status: u16,
    remaining: Option<u64>,
    body: &str,
) -> Result<SearchOutcome, OracleError> {
    if (200..300).contains(&status) {
        let count = serde_json::from_str::<SearchResponse>(body)
            .ok()
            .and_then(|r| r.total_count);
        return match (count, remaining) {
            (Some(count), _) => Ok(SearchOutcome::Count(count)),
            (None, Some(0)) => Ok(SearchOutcome::RateLimited),
            (None, _) => Err(OracleError::MissingCount),
        };
    }

    let mentions_rate_limit = body.to_ascii_lowercase().contains("rate limit");
    if status == 429 || remaining == Some(0) || (status == 403 && mentions_rate_limit) {
        return Ok(SearchOutcome::RateLimited);
    }

    Err(OracleError::Status {
        status,
        body: body.chars().take(200).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::thread::JoinHandle;

    struct ScriptedSearch {
        replies: RefCell<VecDeque<Result<SearchOutcome, OracleError>>>,
    }

    impl ScriptedSearch {
        fn new(replies: Vec<Result<SearchOutcome, OracleError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
            }
        }
    }

    impl CodeSearch for ScriptedSearch {
        fn search(&self, _term: &str) -> Result<SearchOutcome, OracleError> {
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(OracleError::MissingCount))
        }
    }

    static SLEEPS: Mutex<Vec<Duration>> = Mutex::new(Vec::new());

    fn record_sleep(d: Duration) {
        SLEEPS.lock().unwrap().push(d);
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(1),
            cooldown: Duration::from_millis(100),
        }
    }

    fn no_sleep(_: Duration) {}

    #[test]
    fn first_successful_attempt_returns_count() {
        let search = ScriptedSearch::new(vec![Ok(SearchOutcome::Count(42))]);
        let mut oracle = RetryingOracle::with_sleep(search, policy(), no_sleep);
        assert_eq!(oracle.query("strlen").unwrap(), 42);
        assert_eq!(oracle.queries(), 1);
    }

    #[test]
    fn rate_limit_triggers_cooldown_before_retry() {
        SLEEPS.lock().unwrap().clear();
        let search = ScriptedSearch::new(vec![
            Ok(SearchOutcome::RateLimited),
            Ok(SearchOutcome::Count(7)),
        ]);
        let mut oracle = RetryingOracle::with_sleep(search, policy(), record_sleep);

        assert_eq!(oracle.query("strlen").unwrap(), 7);
        assert_eq!(oracle.queries(), 2);
        let sleeps = SLEEPS.lock().unwrap().clone();
        assert_eq!(
            sleeps,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(100),
                Duration::from_millis(1),
            ]
        );
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let search = ScriptedSearch::new(vec![
            Err(OracleError::MissingCount),
            Err(OracleError::MissingCount),
            Err(OracleError::MissingCount),
            Err(OracleError::MissingCount),
            Err(OracleError::MissingCount),
            Ok(SearchOutcome::Count(1)),
        ]);
        let mut oracle = RetryingOracle::with_sleep(search, policy(), no_sleep);

        let err = oracle.query("baz").unwrap_err();
        assert!(matches!(err, OracleError::Exhausted { attempts: 5, .. }));
        assert_eq!(oracle.queries(), 5);
    }

    #[test]
    fn parse_reads_total_count() {
        let outcome = parse_search_response(200, Some(9), r#"{"total_count": 95000, "items": []}"#);
        assert_eq!(outcome.unwrap(), SearchOutcome::Count(95000));
    }

    #[test]
    fn parse_detects_rate_limit_signals() {
        assert_eq!(
            parse_search_response(403, Some(0), r#"{"message":"API rate limit exceeded"}"#).unwrap(),
            SearchOutcome::RateLimited
        );
        assert_eq!(
            parse_search_response(429, None, "").unwrap(),
            SearchOutcome::RateLimited
        );
        assert_eq!(
            parse_search_response(200, Some(0), "{}").unwrap(),
            SearchOutcome::RateLimited
        );
    }

    #[test]
    fn parse_rejects_missing_count_and_server_errors() {
        assert!(matches!(
            parse_search_response(200, Some(5), r#"{"items": []}"#),
            Err(OracleError::MissingCount)
        ));
        assert!(matches!(
            parse_search_response(500, Some(5), "oops"),
            Err(OracleError::Status { status: 500, .. })
        ));
        assert!(matches!(
            parse_search_response(403, Some(25), r#"{"message":"Resource not accessible"}"#),
            Err(OracleError::Status { status: 403, .. })
        ));
        assert_eq!(
            parse_search_response(403, Some(25), "You have exceeded a secondary Rate Limit").unwrap(),
            SearchOutcome::RateLimited
        );
    }

    fn serve_once(
        status_line: &'static str,
        extra_headers: &'static str,
        body: &'static str,
    ) -> anyhow::Result<(String, JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept search request");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).expect("read search request");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "{status_line}\r\n{extra_headers}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .expect("write search response");
            String::from_utf8_lossy(&request).to_lowercase()
        });
        Ok((format!("http://{addr}/search/code"), handle))
    }

    fn local_search(endpoint: String) -> anyhow::Result<GithubCodeSearch> {
        let client = reqwest::blocking::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(GithubCodeSearch::with_client(
            client,
            endpoint,
            "test-token".to_string(),
            "php".to_string(),
        ))
    }

    #[test]
    fn github_search_sends_query_and_reads_total_count() -> anyhow::Result<()> {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 200 OK",
            "x-ratelimit-remaining: 9\r\n",
            r#"{"total_count": 123456, "incomplete_results": false, "items": []}"#,
        )?;
        let search = local_search(endpoint)?;

        let outcome = search.search("strlen")?;
        let request = server.join().expect("server thread");

        assert_eq!(outcome, SearchOutcome::Count(123456));
        assert!(
            request.starts_with("get /search/code?q=strlen+language%3aphp&per_page=1 "),
            "{request}"
        );
        assert!(request.contains("authorization: bearer test-token"), "{request}");
        assert!(request.contains("accept: application/vnd.github+json"), "{request}");
        Ok(())
    }

    #[test]
    fn github_search_maps_exhausted_quota_to_rate_limited() -> anyhow::Result<()> {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 403 Forbidden",
            "x-ratelimit-remaining: 0\r\n",
            r#"{"message": "Forbidden"}"#,
        )?;
        let search = local_search(endpoint)?;

        let outcome = search.search("exec")?;
        server.join().expect("server thread");

        assert_eq!(outcome, SearchOutcome::RateLimited);
        Ok(())
    }
}
