//! Web search tool using DuckDuckGo HTML results (no API key required).

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

use super::{Tool, ToolError, ToolSpec, required_str};

/// Base URL for DuckDuckGo HTML search.
const DDG_HTML_URL: &str = "https://html.duckduckgo.com/html/";
/// Results returned when the model does not ask for a count.
const DEFAULT_MAX_RESULTS: usize = 5;
/// Upper bound on requested results.
const MAX_RESULTS_CAP: usize = 10;

/// One search hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Snippet.
    pub description: String,
    /// Host of the target URL.
    pub domain: String,
}

/// `web_search` tool.
pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    /// Create the tool around a shared HTTP client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_search".to_string(),
            description: "Search the web and return the top results with snippets.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "max_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_RESULTS_CAP,
                        "description": "Number of results to return"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = required_str(arguments, "query")?;
        let max_results = arguments
            .get("max_results")
            .and_then(serde_json::Value::as_u64)
            .map_or(DEFAULT_MAX_RESULTS, |n| {
                usize::try_from(n).unwrap_or(MAX_RESULTS_CAP)
            })
            .clamp(1, MAX_RESULTS_CAP);

        let response = self
            .client
            .post(DDG_HTML_URL)
            .form(&[("q", query), ("b", "")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ToolError::Failed(format!(
                "DuckDuckGo returned status: {}",
                response.status()
            )));
        }

        let html = response.text().await?;
        let hits = parse_results(&html, max_results)?;
        if hits.is_empty() {
            tracing::warn!(query, "No results found in DuckDuckGo HTML response");
        }

        Ok(serde_json::json!({ "query": query, "results": hits }))
    }
}

fn selector(css: &str) -> Result<Selector, ToolError> {
    Selector::parse(css).map_err(|e| ToolError::Failed(format!("Invalid selector: {e:?}")))
}

/// Parse DuckDuckGo HTML results.
fn parse_results(html: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
    let document = Html::parse_document(html);

    let result_selector = selector(".result")?;
    let title_selector = selector(".result__a")?;
    let snippet_selector = selector(".result__snippet")?;
    let url_selector = selector(".result__url")?;

    let mut hits = Vec::new();
    for element in document.select(&result_selector) {
        if hits.len() >= max_results {
            break;
        }

        let Some(anchor) = element.select(&title_selector).next() else {
            continue;
        };
        let title = anchor.text().collect::<String>().trim().to_string();
        let url = anchor
            .value()
            .attr("href")
            .map(extract_url_from_ddg_redirect)
            .unwrap_or_default();
        if title.is_empty() || url.is_empty() {
            continue;
        }

        let description = element
            .select(&snippet_selector)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let display_url = element
            .select(&url_selector)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let domain = extract_domain(&url).unwrap_or(display_url);

        hits.push(SearchHit {
            title,
            url,
            description,
            domain,
        });
    }

    Ok(hits)
}

/// Extract the actual URL from DuckDuckGo's redirect URL.
fn extract_url_from_ddg_redirect(href: &str) -> String {
    // //duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com&rut=...
    if let Some(uddg_start) = href.find("uddg=") {
        let encoded = &href[uddg_start + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        urlencoding::decode(encoded).map_or_else(|_| encoded.to_string(), |s| s.into_owned())
    } else if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    }
}

/// Extract domain from URL.
fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <div class="result">
          <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2Flearn&rut=1">Learn Rust</a>
          <a class="result__url">www.rust-lang.org/learn</a>
          <a class="result__snippet">The Rust book and more.</a>
        </div>
        <div class="result">
          <a class="result__a" href="https://docs.rs/">Docs.rs</a>
          <a class="result__snippet">Crate documentation.</a>
        </div>
        <div class="result"><a class="result__a" href="">   </a></div>
    "#;

    #[test]
    fn parses_results_and_decodes_redirects() {
        let hits = parse_results(SAMPLE, 10).unwrap_or_default();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.rust-lang.org/learn");
        assert_eq!(hits[0].domain, "www.rust-lang.org");
        assert_eq!(hits[0].description, "The Rust book and more.");
        assert_eq!(hits[1].title, "Docs.rs");
    }

    #[test]
    fn respects_max_results() {
        let hits = parse_results(SAMPLE, 1).unwrap_or_default();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_extract_url_from_ddg_redirect() {
        let redirect = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=123";
        assert_eq!(extract_url_from_ddg_redirect(redirect), "https://example.com/page");
        assert_eq!(extract_url_from_ddg_redirect("//example.org/x"), "https://example.org/x");
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://www.example.com/page"),
            Some("www.example.com".to_string())
        );
        assert_eq!(extract_domain("invalid"), None);
    }
}
