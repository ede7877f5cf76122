//! Anti-forgery token lookup for the detection form.

use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use tokio::sync::Mutex;

use super::detect::DetectError;

/// Header the detection site checks on POST.
pub const CSRF_HEADER: &str = "X-CSRFToken";
/// Hidden form field carrying the token in the page markup.
pub const CSRF_FIELD: &str = "csrfmiddlewaretoken";

static INPUT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("static regex"));
static NAME_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bname\s*=\s*["']csrfmiddlewaretoken["']"#).expect("static regex")
});
static VALUE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bvalue\s*=\s*["']([^"']*)["']"#).expect("static regex")
});

/// Where the token comes from.
pub enum CsrfSource {
    /// Configured by hand.
    Fixed(String),
    /// Scraped from the form page and cached until invalidated.
    Page {
        url: String,
        cached: Mutex<Option<String>>,
    },
}

impl CsrfSource {
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::Fixed(token.into())
    }

    pub fn from_page(url: impl Into<String>) -> Self {
        Self::Page {
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    /// Current token, fetching the form page when nothing is cached.
    pub async fn token(&self, http: &Client) -> Result<String, DetectError> {
        match self {
            Self::Fixed(t) => Ok(t.clone()),
            Self::Page { url, cached } => {
                let mut guard = cached.lock().await;
                if let Some(t) = guard.as_ref() {
                    return Ok(t.clone());
                }
                let token = fetch_page_token(http, url).await?;
                tracing::info!("csrf token fetched from {url}");
                *guard = Some(token.clone());
                Ok(token)
            }
        }
    }

    /// Drop a cached page token so the next submit fetches a new one.
    pub async fn invalidate(&self) {
        if let Self::Page { cached, .. } = self {
            if cached.lock().await.take().is_some() {
                tracing::warn!("csrf token rejected; cache cleared");
            }
        }
    }
}

/// GET the form page and pull the hidden token field out of it.
async fn fetch_page_token(http: &Client, url: &str) -> Result<String, DetectError> {
    let html = http
        .get(url)
        .send()
        .await
        .map_err(|e| DetectError::Network(e.to_string()))?
        .error_for_status()
        .map_err(|e| DetectError::Csrf(e.to_string()))?
        .text()
        .await
        .map_err(|e| DetectError::Network(e.to_string()))?;
    extract_token(&html).ok_or_else(|| DetectError::Csrf(format!("no {CSRF_FIELD} field on {url}")))
}

/// Value of the first `<input name="csrfmiddlewaretoken" value="...">`.
pub fn extract_token(html: &str) -> Option<String> {
    INPUT_TAG
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| NAME_ATTR.is_match(tag))
        .find_map(|tag| VALUE_ATTR.captures(tag))
        .map(|c| c[1].to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_token_in_form_markup() {
        let html = r#"
            <form id="uploadForm" method="post">
              <input type="text" name="brand_name" value="">
              <input type="hidden" name="csrfmiddlewaretoken" value="abc123XYZ">
            </form>"#;
        assert_eq!(extract_token(html).as_deref(), Some("abc123XYZ"));
    }

    #[test]
    fn test_attribute_order_and_quotes_do_not_matter() {
        let html = "<INPUT value='tok' type='hidden' name='csrfmiddlewaretoken'/>";
        assert_eq!(extract_token(html).as_deref(), Some("tok"));
    }

    #[test]
    fn test_missing_or_empty_token_is_none() {
        assert_eq!(extract_token("<input name=\"q\" value=\"x\">"), None);
        assert_eq!(
            extract_token("<input name=\"csrfmiddlewaretoken\" value=\"\">"),
            None
        );
    }

    #[tokio::test]
    async fn test_fixed_token_needs_no_request() {
        let src = CsrfSource::fixed("manual");
        let token = src.token(&Client::new()).await.unwrap();
        assert_eq!(token, "manual");
    }
}
