use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::url_utils::convert_to_absolute_url;

lazy_static! {
    static ref ANCHOR: Selector = Selector::parse("a[href]").expect("static selector");
    // Words, keeping inner apostrophes (don't, o’brien)
    static ref WORD: Regex =
        Regex::new(r"\b(?:\w+(?:'\w+|\x{2019}\w+)|\w+)\b").expect("static regex");
}

const NON_VISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Everything the worker needs from one page, from a single HTML parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    /// Absolute, defragmented, not yet validated
    pub links: Vec<String>,
    /// Lower-cased words of the visible text, in document order
    pub tokens: Vec<String>,
}

/// Parse an HTML body once and pull out outbound links and visible-text tokens.
///
/// Malformed markup never fails: it yields whatever links and words survive.
pub fn parse_page(base_url: &Url, html_body: &str) -> ParsedPage {
    let document = Html::parse_document(html_body);
    ParsedPage {
        links: absolute_links(&document, base_url),
        tokens: tokenize(&visible_text(document.root_element())),
    }
}

/// Extract all hyperlinks from HTML content, resolved against `base_url`.
///
/// # Examples
/// ```
/// use rust_crawler::parser::extract_links;
/// use url::Url;
///
/// let base = Url::parse("https://www.ics.uci.edu/about/").unwrap();
/// let html = r#"<html><body><a href="../people#staff">People</a></body></html>"#;
/// assert_eq!(extract_links(&base, html), vec!["https://www.ics.uci.edu/people"]);
/// ```
pub fn extract_links(base_url: &Url, html_body: &str) -> Vec<String> {
    let document = Html::parse_document(html_body);
    absolute_links(&document, base_url)
}

fn absolute_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    for element in document.select(&ANCHOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || is_non_navigational(href) {
            continue;
        }

        match convert_to_absolute_url(href, base_url) {
            Ok(absolute) => links.push(absolute),
            Err(e) => tracing::debug!("Skipping unresolvable href {:?} on {}: {}", href, base_url, e),
        }
    }

    links
}

fn is_non_navigational(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    ["javascript:", "mailto:", "tel:", "data:", "file:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut text = String::new();
    collect_text(root, &mut text);
    text
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    if NON_VISIBLE_TAGS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(t) => {
                out.push_str(t);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, out);
                }
            }
            _ => {}
        }
    }
}

/// Split text into lower-cased word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}
