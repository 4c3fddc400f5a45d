//! Live web search through a self-hosted SearXNG instance.
//!
//! Results come back as a plain-text digest meant for prompt injection, not
//! for display: infobox first (a direct answer when the engine has one), then
//! up to five ranked sources with their highlight terms pulled forward.

use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_RESULTS: usize = 5;
const MAX_HIGHLIGHTS: usize = 5;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const SEARCH_INTENT_KEYWORDS: &[&str] = &[
    "who", "what", "where", "when", "why", "how", "price", "weather", "news", "current",
    "latest", "today", "yesterday",
];

/// Cheap heuristic for whether a message wants real-time facts. Question
/// words, a question mark, or time-sensitive vocabulary all count.
pub fn is_fact_seeking(text: &str) -> bool {
    if text.contains('?') {
        return true;
    }
    let lower = text.to_lowercase();
    SEARCH_INTENT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

pub struct SearchClient {
    http: Client,
    base_url: String,
}

impl SearchClient {
    pub fn new(base_url: &str) -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.to_string(),
        }
    }

    /// Run one query and digest the result page. Failures degrade to text so
    /// the caller can feed whatever comes back straight into the prompt.
    pub async fn search(&self, query: &str) -> String {
        info!("Live search on {}: {}", self.base_url, query);

        let response = match self
            .http
            .get(&self.base_url)
            .query(&[("q", query)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Search request failed: {:#}", e);
                return format!("Search error: {e}");
            }
        };

        let status = response.status();
        if !status.is_success() {
            error!("Search engine returned status {}", status);
            return format!("Search engine offline (Status {})", status.as_u16());
        }

        let html = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to read search response: {:#}", e);
                return format!("Search error: {e}");
            }
        };

        let digest = digest_results(&html);
        if digest.is_empty() {
            warn!("Search returned 0 results");
            return "No real-time data found.".to_string();
        }
        digest
    }
}

// `scraper::Html` is not Send, so all parsing stays inside this synchronous
// helper; the async path above only ever holds the raw body string.
fn digest_results(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut sections = Vec::new();

    let infobox_sel = Selector::parse(".infobox, aside.infobox").ok();
    let title_sel = Selector::parse(".title, h2").ok();
    let content_sel = Selector::parse(".content, p").ok();

    if let (Some(infobox_sel), Some(title_sel), Some(content_sel)) =
        (&infobox_sel, &title_sel, &content_sel)
    {
        if let Some(infobox) = document.select(infobox_sel).next() {
            let title = infobox.select(title_sel).next().map(element_text);
            let content = infobox.select(content_sel).next().map(element_text);
            if let (Some(title), Some(content)) = (title, content) {
                sections.push(format!("DIRECT ANSWER: {title}\nSUMMARY: {content}"));
            }
        }
    }

    let article_sel = Selector::parse("article.result, .result").ok();
    let link_sel = Selector::parse("h3 a, .title a").ok();
    let snippet_sel = Selector::parse(".content, .snippet").ok();
    let date_sel = Selector::parse(".published_date, .date").ok();
    let highlight_sel = Selector::parse(".highlight").ok();

    if let (Some(article_sel), Some(link_sel), Some(snippet_sel), Some(date_sel), Some(highlight_sel)) =
        (&article_sel, &link_sel, &snippet_sel, &date_sel, &highlight_sel)
    {
        for (i, article) in document.select(article_sel).take(MAX_RESULTS).enumerate() {
            let Some(link) = article.select(link_sel).next() else {
                continue;
            };
            let title = element_text(link);
            let url = link.value().attr("href").unwrap_or("").to_string();
            let date = article
                .select(date_sel)
                .next()
                .map(element_text)
                .unwrap_or_else(|| "recent".to_string());
            let mut snippet = article
                .select(snippet_sel)
                .next()
                .map(element_text)
                .unwrap_or_default();

            let highlights: Vec<String> = article
                .select(highlight_sel)
                .take(MAX_HIGHLIGHTS)
                .map(element_text)
                .collect();
            if !highlights.is_empty() {
                snippet = format!("[KEY DATA: {}] {}", highlights.join(" | "), snippet);
            }

            sections.push(format!(
                "SOURCE [{}]: {} ({})\nURL: {}\nSUMMARY: {}",
                i + 1,
                title,
                date,
                url,
                snippet
            ));
        }
    }

    sections.join("\n\n")
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
        <html><body>
          <aside class="infobox">
            <h2 class="title">Rust (programming language)</h2>
            <p class="content">A systems language focused on safety.</p>
          </aside>
          <article class="result">
            <h3><a href="https://example.com/a">First hit</a></h3>
            <p class="content">Snippet with a <span class="highlight">1.80</span> number.</p>
            <span class="published_date">2026-08-01</span>
          </article>
          <article class="result">
            <h3><a href="https://example.com/b">Second hit</a></h3>
            <p class="content">Another snippet.</p>
          </article>
        </body></html>
    "#;

    #[test]
    fn test_digest_extracts_infobox_and_sources() {
        let digest = digest_results(RESULTS_PAGE);
        assert!(digest.starts_with("DIRECT ANSWER: Rust (programming language)"));
        assert!(digest.contains("SOURCE [1]: First hit (2026-08-01)"));
        assert!(digest.contains("URL: https://example.com/a"));
        assert!(digest.contains("[KEY DATA: 1.80]"));
        // Missing date falls back instead of dropping the result.
        assert!(digest.contains("SOURCE [2]: Second hit (recent)"));
    }

    #[test]
    fn test_digest_caps_source_count() {
        let articles: String = (0..8)
            .map(|i| {
                format!(
                    r#"<article class="result"><h3><a href="u{i}">Hit {i}</a></h3>
                       <p class="content">s</p></article>"#
                )
            })
            .collect();
        let digest = digest_results(&format!("<html><body>{articles}</body></html>"));
        assert!(digest.contains("SOURCE [5]:"));
        assert!(!digest.contains("SOURCE [6]:"));
    }

    #[test]
    fn test_empty_page_digests_to_nothing() {
        assert!(digest_results("<html><body></body></html>").is_empty());
    }

    #[test]
    fn test_fact_seeking_heuristic() {
        assert!(is_fact_seeking("What is the weather in Berlin"));
        assert!(is_fact_seeking("latest rust release"));
        assert!(is_fact_seeking("any plans tonight?"));
        assert!(!is_fact_seeking("thanks, that was helpful"));
    }
}
