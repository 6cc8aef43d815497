use crate::error::ValidationError;
use async_trait::async_trait;
use url::Url;

/// Hosts refused by default: other shorteners, to prevent chained shortening.
pub const DEFAULT_BLACKLIST: &[&str] = &["bit.ly", "tinyurl.com"];

/// Syntactic and policy checks applied to a URL before it is shortened.
#[async_trait]
pub trait UrlValidator: Send + Sync + 'static {
    fn validate(&self, url: &str) -> Result<(), ValidationError>;

    /// Reputation check. The default policy trusts everything.
    async fn is_safe(&self, _url: &str) -> bool {
        true
    }
}

/// Accepts absolute http(s) URLs whose host is not blacklisted.
///
/// A blacklist entry matches the host itself and every subdomain of it.
#[derive(Debug, Clone)]
pub struct DefaultValidator {
    blacklist: Vec<String>,
}

impl Default for DefaultValidator {
    fn default() -> Self {
        Self::with_blacklist(DEFAULT_BLACKLIST.iter().copied())
    }
}

impl DefaultValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blacklist<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blacklist = hosts
            .into_iter()
            .map(|host| host.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        Self { blacklist }
    }

    fn is_blacklisted(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.');
        self.blacklist.iter().any(|entry| {
            host == entry
                || host
                    .strip_suffix(entry.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

#[async_trait]
impl UrlValidator for DefaultValidator {
    fn validate(&self, url: &str) -> Result<(), ValidationError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ValidationError::Empty);
        }
        // The parser strips tabs and newlines silently; the stored URL must be
        // usable as a Location header verbatim.
        if url.chars().any(char::is_control) {
            return Err(ValidationError::Malformed(
                "url contains control characters".to_string(),
            ));
        }

        let parsed = Url::parse(url).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
        }

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(ValidationError::MissingHost),
        };
        if self.is_blacklisted(host) {
            return Err(ValidationError::Blacklisted(host.to_string()));
        }

        Ok(())
    }
}
