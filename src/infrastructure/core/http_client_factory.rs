use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Client for idempotent requests (market data, balances): retries
    /// transient failures with exponential backoff, max 3 attempts.
    pub fn create_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        ClientBuilder::new(Self::base_client())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    /// Client for order submission: NO retry middleware. A transient failure
    /// after the request left the socket could otherwise double-submit; the
    /// caller surfaces the failure instead and the signature's recv-window
    /// bounds any server-side replay.
    pub fn create_transactional_client() -> ClientWithMiddleware {
        ClientBuilder::new(Self::base_client()).build()
    }

    fn base_client() -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}

/// Build a URL-encoded query string in parameter order.
///
/// Signed requests need the exact serialized query (the HMAC covers it), so
/// the string is built manually instead of relying on the client's query
/// serializer.
pub fn encode_query<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k.as_ref()), percent_encode(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Append an encoded query string to a base URL.
pub fn url_with_query(base_url: &str, query: &str) -> String {
    if query.is_empty() {
        return base_url.to_string();
    }
    if base_url.contains('?') {
        format!("{}&{}", base_url, query)
    } else {
        format!("{}?{}", base_url, query)
    }
}

/// Minimal percent-encoding for query parameter values.
fn percent_encode(s: &str) -> String {
    let mut encoded = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    encoded
}
