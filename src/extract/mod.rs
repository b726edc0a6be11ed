use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;
use url::Url;

use crate::error::{ExtractFailure, ResearchError};
use crate::model::{ExtractedDocument, RawPage};

pub const DEFAULT_MIN_BODY_CHARS: usize = 200;

const SKIPPED_TAGS: [&str; 14] = [
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe", "svg",
    "button", "template", "select", "dialog",
];

const BOILERPLATE_ROLES: [&str; 5] = ["navigation", "banner", "contentinfo", "complementary", "search"];

// matched against the dash/underscore separated parts of class and id values
const BOILERPLATE_TOKENS: [&str; 19] = [
    "nav", "navbar", "navigation", "menu", "footer", "header", "sidebar", "cookie", "cookies",
    "banner", "ad", "ads", "advert", "share", "social", "breadcrumb", "breadcrumbs", "newsletter",
    "popup",
];

const BLOCK_TAGS: [&str; 24] = [
    "p", "div", "section", "article", "main", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "blockquote", "pre", "br", "tr", "td", "th", "table", "dd", "dt", "figcaption",
];

/// Turns rendered HTML into title, body text and outbound links.
/// Pure: the same page always yields the same document.
pub struct ContentExtractor {
    min_body_chars: usize,
    title_selector: Selector,
    og_title_selector: Selector,
    heading_selector: Selector,
    content_root_selectors: Vec<Selector>,
}

impl ContentExtractor {
    pub fn new(min_body_chars: usize) -> Result<Self, ResearchError> {
        let parse = |css: &str| {
            Selector::parse(css).map_err(|e| ResearchError::ParseError(format!("Invalid selector '{}': {}", css, e)))
        };

        Ok(Self {
            min_body_chars,
            title_selector: parse("title")?,
            og_title_selector: parse("meta[property='og:title']")?,
            heading_selector: parse("h1")?,
            content_root_selectors: vec![
                parse("article")?,
                parse("main")?,
                parse("[role='main']")?,
                parse("body")?,
            ],
        })
    }

    pub fn min_body_chars(&self) -> usize {
        self.min_body_chars
    }

    pub fn extract(&self, page: &RawPage) -> Result<ExtractedDocument, ExtractFailure> {
        if let Some(ref content_type) = page.content_type {
            let content_type = content_type.to_lowercase();
            if !(content_type.contains("html") || content_type.starts_with("text/")) {
                return Err(ExtractFailure::ParseError(format!(
                    "Unsupported content type '{}'",
                    content_type
                )));
            }
        }
        if page.html.trim().is_empty() {
            return Err(ExtractFailure::ParseError("Empty document".to_string()));
        }
        if page.html.contains('\0') {
            return Err(ExtractFailure::ParseError("Binary content".to_string()));
        }

        let base = Url::parse(&page.final_url)
            .or_else(|_| Url::parse(&page.url))
            .map_err(|e| ExtractFailure::ParseError(format!("Invalid page URL '{}': {}", page.url, e)))?;

        let document = Html::parse_document(&page.html);
        let title = self.extract_title(&document).unwrap_or_else(|| page.url.clone());

        let root = self
            .content_root_selectors
            .iter()
            .find_map(|selector| document.select(selector).next())
            .unwrap_or_else(|| document.root_element());

        let mut collector = TextCollector::new(&base);
        collector.walk(root);
        let (body, links) = collector.finish();

        let length = body.chars().count();
        if length < self.min_body_chars {
            debug!("Body of {} too short after stripping: {} chars", page.url, length);
            return Err(ExtractFailure::EmptyBody {
                length,
                minimum: self.min_body_chars,
            });
        }

        Ok(ExtractedDocument {
            source_url: page.url.clone(),
            title,
            body,
            links,
        })
    }

    fn extract_title(&self, document: &Html) -> Option<String> {
        let og_title = document
            .select(&self.og_title_selector)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(collapse_whitespace);

        let title_tag = || {
            document
                .select(&self.title_selector)
                .next()
                .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        };

        let heading = || {
            document
                .select(&self.heading_selector)
                .next()
                .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        };

        og_title
            .filter(|title| !title.is_empty())
            .or_else(|| title_tag().filter(|title| !title.is_empty()))
            .or_else(|| heading().filter(|title| !title.is_empty()))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_boilerplate(element: &ElementRef) -> bool {
    let value = element.value();
    if SKIPPED_TAGS.contains(&value.name()) {
        return true;
    }
    if value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") {
        return true;
    }
    if let Some(role) = value.attr("role") {
        if BOILERPLATE_ROLES.contains(&role.to_lowercase().as_str()) {
            return true;
        }
    }

    let markers = value.attr("class").into_iter().chain(value.attr("id"));
    for marker in markers {
        for token in marker.split_whitespace() {
            let token = token.to_lowercase();
            if token
                .split(|c: char| c == '-' || c == '_')
                .any(|part| BOILERPLATE_TOKENS.contains(&part))
            {
                return true;
            }
        }
    }
    false
}

/// Walks the content root, building paragraphs at block boundaries and
/// collecting absolute http(s) links outside of boilerplate.
struct TextCollector<'a> {
    base: &'a Url,
    paragraphs: Vec<String>,
    current: String,
    links: Vec<String>,
}

impl<'a> TextCollector<'a> {
    fn new(base: &'a Url) -> Self {
        Self {
            base,
            paragraphs: Vec::new(),
            current: String::new(),
            links: Vec::new(),
        }
    }

    fn walk(&mut self, element: ElementRef) {
        let name = element.value().name();
        let is_block = BLOCK_TAGS.contains(&name);
        if is_block {
            self.break_paragraph();
        }

        if name == "a" {
            if let Some(href) = element.value().attr("href") {
                self.push_link(href);
            }
        }

        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.push_text(text),
                Node::Element(_) => {
                    if let Some(child_element) = ElementRef::wrap(child) {
                        if !is_boilerplate(&child_element) {
                            self.walk(child_element);
                        }
                    }
                }
                _ => {}
            }
        }

        if is_block {
            self.break_paragraph();
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.trim().is_empty() {
            if !self.current.is_empty() && !self.current.ends_with(' ') {
                self.current.push(' ');
            }
            return;
        }
        if text.starts_with(char::is_whitespace) && !self.current.is_empty() && !self.current.ends_with(' ') {
            self.current.push(' ');
        }
        self.current.push_str(&collapse_whitespace(text));
        if text.ends_with(char::is_whitespace) {
            self.current.push(' ');
        }
    }

    fn push_link(&mut self, href: &str) {
        let Ok(mut resolved) = self.base.join(href.trim()) else {
            return;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            return;
        }
        resolved.set_fragment(None);
        let resolved = resolved.to_string();
        if !self.links.contains(&resolved) {
            self.links.push(resolved);
        }
    }

    fn break_paragraph(&mut self) {
        let paragraph = self.current.trim();
        if !paragraph.is_empty() {
            self.paragraphs.push(paragraph.to_string());
        }
        self.current.clear();
    }

    fn finish(mut self) -> (String, Vec<String>) {
        self.break_paragraph();
        (self.paragraphs.join("\n\n"), self.links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_HTML: &str = r#"
        <html>
          <head>
            <title>Fallback title</title>
            <meta property="og:title" content="  Effects of X   on Y ">
            <script>var tracking = "should never appear";</script>
          </head>
          <body>
            <nav class="site-nav"><a href="/home">Home</a> <a href="/about">About</a></nav>
            <div id="cookie-banner">We use cookies to improve your experience.</div>
            <article>
              <h1>Effects of X on Y</h1>
              <p>Researchers measured how X changes Y across <b>twelve</b> independent trials.</p>
              <p>The effect was strongest in the second quarter. See the
                 <a href="/data/results.csv#raw">raw results</a> and the
                 <a href="https://journal.example.org/paper">published paper</a>.</p>
              <div class="share-buttons"><a href="https://social.example.com/share">Share</a></div>
              <p>Follow-up work is planned for next year with a larger cohort of participants.</p>
            </article>
            <footer>Copyright notice and unrelated links</footer>
          </body>
        </html>
    "#;

    fn page(html: &str) -> RawPage {
        RawPage::new("https://news.example.com/story", html)
    }

    #[test]
    fn test_extracts_title_body_and_links() {
        let extractor = ContentExtractor::new(50).unwrap();
        let document = extractor.extract(&page(ARTICLE_HTML)).unwrap();

        assert_eq!(document.source_url, "https://news.example.com/story");
        assert_eq!(document.title, "Effects of X on Y");
        assert!(document.body.contains("across twelve independent trials"));
        assert!(document.body.contains("Follow-up work is planned"));
        assert_eq!(
            document.links,
            vec![
                "https://news.example.com/data/results.csv".to_string(),
                "https://journal.example.org/paper".to_string(),
            ]
        );
    }

    #[test]
    fn test_strips_boilerplate() {
        let extractor = ContentExtractor::new(50).unwrap();
        let document = extractor.extract(&page(ARTICLE_HTML)).unwrap();

        assert!(!document.body.contains("should never appear"));
        assert!(!document.body.contains("cookies"));
        assert!(!document.body.contains("Copyright"));
        assert!(!document.body.contains("Share"));
        assert!(!document.links.iter().any(|link| link.ends_with("/home")));
    }

    #[test]
    fn test_paragraphs_are_separated() {
        let extractor = ContentExtractor::new(10).unwrap();
        let document = extractor
            .extract(&page("<body><p>first paragraph here</p><p>second paragraph here</p></body>"))
            .unwrap();
        assert_eq!(document.body, "first paragraph here\n\nsecond paragraph here");
    }

    #[test]
    fn test_extract_is_deterministic() {
        let extractor = ContentExtractor::new(50).unwrap();
        let raw = page(ARTICLE_HTML);
        let first = extractor.extract(&raw).unwrap();
        let second = extractor.extract(&raw).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_short_body_is_empty_body() {
        let extractor = ContentExtractor::new(DEFAULT_MIN_BODY_CHARS).unwrap();
        let failure = extractor
            .extract(&page("<html><body><nav>menu</nav><p>Too short.</p></body></html>"))
            .unwrap_err();
        assert_eq!(
            failure,
            ExtractFailure::EmptyBody {
                length: 10,
                minimum: DEFAULT_MIN_BODY_CHARS
            }
        );
    }

    #[test]
    fn test_unparseable_input_is_parse_error() {
        let extractor = ContentExtractor::new(10).unwrap();

        assert!(matches!(
            extractor.extract(&page("   ")),
            Err(ExtractFailure::ParseError(_))
        ));

        let mut pdf = page("%PDF-1.7 binary");
        pdf.content_type = Some("application/pdf".to_string());
        assert!(matches!(extractor.extract(&pdf), Err(ExtractFailure::ParseError(_))));
    }

    #[test]
    fn test_title_falls_back_to_url() {
        let extractor = ContentExtractor::new(5).unwrap();
        let document = extractor
            .extract(&page("<body><p>untitled but long enough</p></body>"))
            .unwrap();
        assert_eq!(document.title, "https://news.example.com/story");
    }
}
