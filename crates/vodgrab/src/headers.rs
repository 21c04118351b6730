// Request-header seam. The engine never invents headers; the owning
// application supplies them through this interface (cookies included).

use std::collections::HashMap;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Supplies the full header set for each outgoing request.
pub trait HeaderProvider: Send + Sync {
    fn headers_for(&self, url: &Url) -> HashMap<String, String>;
}

/// Default provider emitting a browser-shaped header set with the playlist's
/// origin as `Referer` and `Sec-Fetch-*` consistent with a cross-site fetch.
#[derive(Debug, Clone)]
pub struct BrowserHeaderProvider {
    referer: String,
    user_agent: String,
    cookie: Option<String>,
}

impl BrowserHeaderProvider {
    /// `playlist_url` supplies the `Referer` origin (scheme + host).
    pub fn new(playlist_url: &Url) -> Self {
        let referer = format!(
            "{}://{}/",
            playlist_url.scheme(),
            playlist_url.host_str().unwrap_or_default()
        );
        Self {
            referer,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            cookie: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Attach a cookie header verbatim.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }
}

impl HeaderProvider for BrowserHeaderProvider {
    fn headers_for(&self, _url: &Url) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".into(), self.user_agent.clone());
        headers.insert(
            "Accept".into(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into(),
        );
        headers.insert("Accept-Language".into(), "en-US,en;q=0.5".into());
        headers.insert("Accept-Encoding".into(), "gzip, deflate, br".into());
        headers.insert("Connection".into(), "keep-alive".into());
        headers.insert("Referer".into(), self.referer.clone());
        headers.insert("Sec-Fetch-Dest".into(), "empty".into());
        headers.insert("Sec-Fetch-Mode".into(), "no-cors".into());
        headers.insert("Sec-Fetch-Site".into(), "cross-site".into());
        if let Some(cookie) = &self.cookie {
            headers.insert("Cookie".into(), cookie.clone());
        }
        headers
    }
}
