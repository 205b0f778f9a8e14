use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{url} has no text content")]
    EmptyDocument { url: String },

    #[error("bad selector {0}")]
    Selector(String),
}

/// Plain text of a page and the absolute urls it links to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPage {
    pub text: String,
    pub links: Vec<String>,
}

pub trait Extractor: Send + Sync {
    fn extract(&self, raw: &[u8], base: &Url) -> Result<ExtractedPage, ParseError>;
}

/// Text and `a[href]` extraction with `scraper`.
///
/// Text nodes inside `script`, `style` and `noscript` are skipped. Links are
/// resolved against the page url and have their fragment removed.
pub struct HtmlExtractor {
    anchors: Selector,
}

impl HtmlExtractor {
    pub fn new() -> Result<Self, ParseError> {
        let anchors = Selector::parse("a[href]").map_err(|e| ParseError::Selector(e.to_string()))?;
        Ok(Self { anchors })
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, raw: &[u8], base: &Url) -> Result<ExtractedPage, ParseError> {
        let body = String::from_utf8_lossy(raw);
        let doc = Html::parse_document(&body);

        let mut text = String::new();
        for node in doc.root_element().descendants() {
            let Some(chunk) = node.value().as_text() else { continue };
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| matches!(e.name(), "script" | "style" | "noscript")))
                .unwrap_or(false);
            if hidden || chunk.trim().is_empty() { continue; }
            text.push_str(chunk.trim());
            text.push('\n');
        }
        if text.is_empty() {
            return Err(ParseError::EmptyDocument { url: base.to_string() });
        }

        let mut links = Vec::new();
        for a in doc.select(&self.anchors) {
            let Some(href) = a.value().attr("href") else { continue };
            if let Ok(mut u) = base.join(href) {
                u.set_fragment(None);
                links.push(u.to_string());
            }
        }
        Ok(ExtractedPage { text, links })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> ExtractedPage {
        let base = Url::parse("http://site.test/dir/page.html").unwrap();
        HtmlExtractor::new().unwrap().extract(html.as_bytes(), &base).unwrap()
    }

    #[test]
    fn collects_visible_text_only() {
        let page = extract("<html><head><style>p{}</style></head><body><p>Free clinic</p><script>var x = 1;</script><p>Open daily</p></body></html>");
        assert!(page.text.contains("Free clinic"));
        assert!(page.text.contains("Open daily"));
        assert!(!page.text.contains("var x"));
    }

    #[test]
    fn resolves_links_and_drops_fragments() {
        let page = extract(r#"<body>hi <a href="other.html#top">o</a> <a href="/root">r</a> <a href="http://x.test/">x</a></body>"#);
        assert_eq!(
            page.links,
            vec!["http://site.test/dir/other.html", "http://site.test/root", "http://x.test/"]
        );
    }

    #[test]
    fn empty_document_is_a_parse_error() {
        let base = Url::parse("http://site.test/").unwrap();
        let err = HtmlExtractor::new().unwrap().extract(b"<html><body>  </body></html>", &base);
        assert!(matches!(err, Err(ParseError::EmptyDocument { .. })));
    }
}
