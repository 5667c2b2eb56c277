//! URL scraper: fetch a page and extract text, links, tables, or the
//! raw HTML.

use std::time::Duration;

use scraper::Html;
use scraper::Selector;
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::error::Result;
use crate::error::ToolError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

const MAX_TEXT_CHARS: usize = 50_000;
const MAX_LINKS: usize = 500;

pub struct UrlScraper {
    client: reqwest::Client,
}

impl Default for UrlScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlScraper {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn scrape(&self, url: &str, extract: &str) -> Result<JsonValue> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::invalid("URL must start with http:// or https://"));
        }

        let response = tokio::time::timeout(FETCH_TIMEOUT, self.client.get(url).send())
            .await
            .map_err(|_| ToolError::timeout("page fetch", FETCH_TIMEOUT))??;
        if !response.status().is_success() {
            return Err(ToolError::external(format!(
                "HTTP {} fetching {url}",
                response.status(),
            )));
        }
        let html = response.text().await?;

        let extracted = match extract {
            "html" => json!({"html": html}),
            "text" => {
                let text = extract_text(&html);
                json!({"text": text.chars().take(MAX_TEXT_CHARS).collect::<String>()})
            }
            "links" => json!({"links": extract_links(&html)}),
            "tables" => json!({"tables": extract_tables(&html)}),
            other => {
                return Err(ToolError::invalid(format!(
                    "Unknown extract mode '{other}'"
                ))
                .with_hint("Valid modes: text, links, tables, html"));
            }
        };

        let mut result = json!({
            "success": true,
            "url": url,
            "extract": extract,
        });
        if let (Some(result_map), Some(extra)) = (result.as_object_mut(), extracted.as_object()) {
            for (k, v) in extra {
                result_map.insert(k.clone(), v.clone());
            }
        }
        Ok(result)
    }
}

fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    let body = Selector::parse("body").ok();
    let roots: Vec<_> = match &body {
        Some(selector) => document.select(selector).collect(),
        None => Vec::new(),
    };
    let collect = |out: &mut String, texts: scraper::element_ref::Text<'_>| {
        for piece in texts {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(piece);
        }
    };
    if roots.is_empty() {
        collect(&mut out, document.root_element().text());
    } else {
        for root in roots {
            collect(&mut out, root.text());
        }
    }
    out
}

fn extract_links(html: &str) -> Vec<JsonValue> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let text = a.text().collect::<Vec<_>>().join(" ").trim().to_string();
            Some(json!({"href": href, "text": text}))
        })
        .take(MAX_LINKS)
        .collect()
}

fn extract_tables(html: &str) -> Vec<JsonValue> {
    let document = Html::parse_document(html);
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("td, th"),
    ) else {
        return Vec::new();
    };
    document
        .select(&table_sel)
        .map(|table| {
            let rows: Vec<JsonValue> = table
                .select(&row_sel)
                .map(|row| {
                    let cells: Vec<String> = row
                        .select(&cell_sel)
                        .map(|cell| {
                            cell.text().collect::<Vec<_>>().join(" ").trim().to_string()
                        })
                        .collect();
                    json!(cells)
                })
                .collect();
            json!({"rows": rows})
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"
        <html><body>
            <h1>Release Notes</h1>
            <p>Version 2 adds <a href="/docs">documentation</a>.</p>
            <a href="https://example.com">example</a>
            <table>
                <tr><th>Name</th><th>Size</th></tr>
                <tr><td>alpha</td><td>12</td></tr>
            </table>
        </body></html>
    "#;

    #[test]
    fn text_extraction_flattens_markup() {
        let text = extract_text(PAGE);
        assert!(text.contains("Release Notes"));
        assert!(text.contains("Version 2 adds documentation"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn links_carry_href_and_text() {
        let links = extract_links(PAGE);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0]["href"], json!("/docs"));
        assert_eq!(links[1]["text"], json!("example"));
    }

    #[test]
    fn tables_become_row_lists() {
        let tables = extract_tables(PAGE);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0]["rows"][0], json!(["Name", "Size"]));
        assert_eq!(tables[0]["rows"][1], json!(["alpha", "12"]));
    }

    #[tokio::test]
    async fn non_http_urls_are_rejected() {
        let scraper = UrlScraper::new();
        let err = scraper.scrape("file:///etc/passwd", "text").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn scrape_round_trips_through_http() {
        use wiremock::Mock;
        use wiremock::MockServer;
        use wiremock::ResponseTemplate;
        use wiremock::matchers::method;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let scraper = UrlScraper::new();
        let result = scraper.scrape(&server.uri(), "links").await.unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["links"].as_array().unwrap().len(), 2);
    }
}
