//! HTML content extraction.
//!
//! Produces the searchable fields for one captured page: title, cleaned
//! text, snippet, language, content hash, archived-notice flag, and
//! outbound links. Navigation, banner, and footer chrome is pruned so the
//! index carries page content, not site furniture.

use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};
use url::Url;

use crate::urlnorm::normalize_url;

/// Cleaned text kept per snapshot.
pub const MAX_TEXT_BYTES: usize = 4 * 1024;
/// Snippet length cap in characters.
pub const MAX_SNIPPET_CHARS: usize = 280;
/// Outbound links kept per page.
pub const MAX_OUTLINKS: usize = 200;

/// Minimum cleaned-text length before language detection is trusted.
const MIN_LANG_TEXT_CHARS: usize = 40;

/// Elements whose subtrees never contribute text.
const SKIP_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form",
    "iframe", "svg", "button",
];

/// ARIA roles treated as chrome.
const SKIP_ROLES: &[&str] = &["navigation", "banner", "contentinfo", "search"];

/// Bilingual phrases marking the standard "archived page" notice.
const ARCHIVED_PHRASES: &[&str] = &[
    "this page has been archived",
    "archived content",
    "archived page",
    "information archived on the web",
    "cette page a été archivée",
    "cette page web a été archivée",
    "contenu archivé",
    "information archivée",
];

/// Phrases explicitly marking a page as current.
const CURRENT_PHRASES: &[&str] = &["this page is current", "cette page est à jour"];

/// Everything extracted from one HTML capture.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub title: Option<String>,
    /// Cleaned content text, at most [`MAX_TEXT_BYTES`].
    pub text: String,
    pub snippet: String,
    /// ISO 639-3 code, or None when undecidable.
    pub language: Option<String>,
    /// SHA-256 (hex) of the normalized content; stable across re-indexing
    /// of the same bytes.
    pub content_hash: String,
    pub is_archived: Option<bool>,
    /// Absolutized http(s) outlinks, deduplicated, capped.
    pub outlinks: Vec<String>,
}

/// Extract the searchable fields from one HTML document.
pub fn extract_page(html: &str, base_url: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title = select_first(&document, "title")
        .map(|el| collapse_whitespace(&element_text(el)))
        .filter(|t| !t.is_empty());

    // Whole-document text drives hashing and notice detection; the content
    // root drives what gets indexed.
    let body = select_first(&document, "body");
    let body_text = body.map(|el| clean_text(el)).unwrap_or_default();
    let content_text = content_root(&document)
        .map(|el| clean_text(el))
        .unwrap_or_else(|| body_text.clone());

    let normalized = normalized_content(title.as_deref(), &body_text);
    let content_hash = hex_digest(&normalized);

    let text = truncate_bytes(&content_text, MAX_TEXT_BYTES);
    let snippet = truncate_chars(&content_text, MAX_SNIPPET_CHARS);
    let language = detect_language(&content_text);
    let is_archived = detect_archived(title.as_deref(), &body_text);
    let outlinks = extract_outlinks(&document, base_url);

    ExtractedPage {
        title,
        text,
        snippet,
        language,
        content_hash,
        is_archived,
        outlinks,
    }
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

/// Pick the element whose text gets indexed: `<main>`, then `<article>`,
/// then the largest direct child of `<body>` by cleaned text length.
fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    for css in ["main", "article"] {
        if let Some(el) = select_first(document, css) {
            if !clean_text(el).is_empty() {
                return Some(el);
            }
        }
    }

    let body = select_first(document, "body")?;
    let largest = body
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| !should_skip(*el))
        .max_by_key(|el| clean_text(*el).len());
    match largest {
        Some(el) if !clean_text(el).is_empty() => Some(el),
        _ => Some(body),
    }
}

fn should_skip(element: ElementRef<'_>) -> bool {
    let value = element.value();
    if SKIP_ELEMENTS.contains(&value.name()) {
        return true;
    }
    if value.attr("aria-hidden") == Some("true") {
        return true;
    }
    if let Some(role) = value.attr("role") {
        if SKIP_ROLES.contains(&role.to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    false
}

/// Text of an element with chrome subtrees pruned and whitespace collapsed.
fn clean_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    collapse_whitespace(&out)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    if should_skip(element) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    collect_text(el, out);
                }
            }
            _ => {}
        }
    }
}

/// Raw text of an element without pruning (titles have no chrome).
fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The byte stream the content hash is computed over. Empty pages hash the
/// empty input so the hash is still well-defined.
fn normalized_content(title: Option<&str>, body_text: &str) -> Vec<u8> {
    if title.is_none() && body_text.is_empty() {
        return Vec::new();
    }
    let mut normalized = String::new();
    normalized.push_str(title.unwrap_or(""));
    normalized.push('\n');
    normalized.push_str(body_text);
    normalized.into_bytes()
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn truncate_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    // Back off to a word boundary so snippets don't end mid-word.
    match truncated.rfind(' ') {
        Some(space) if space > max_chars / 2 => truncated[..space].to_string(),
        _ => truncated,
    }
}

fn detect_language(text: &str) -> Option<String> {
    if text.chars().count() < MIN_LANG_TEXT_CHARS {
        return None;
    }
    let sample: String = text.chars().take(1000).collect();
    let info = whatlang::detect(&sample)?;
    if !info.is_reliable() {
        return None;
    }
    Some(info.lang().code().to_string())
}

/// Tri-state archived-notice detection over title and visible text.
fn detect_archived(title: Option<&str>, body_text: &str) -> Option<bool> {
    let mut haystack = title.unwrap_or("").to_lowercase();
    haystack.push('\n');
    // The notice banner sits at the top of the page when present.
    haystack.push_str(&body_text.chars().take(2000).collect::<String>().to_lowercase());

    if ARCHIVED_PHRASES.iter().any(|phrase| haystack.contains(phrase)) {
        return Some(true);
    }
    if CURRENT_PHRASES.iter().any(|phrase| haystack.contains(phrase)) {
        return Some(false);
    }
    None
}

fn extract_outlinks(document: &Html, base_url: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut seen = std::collections::HashSet::new();
    let mut outlinks = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else { continue };
        let resolved = match &base {
            Some(base) => base.join(href).map(|u| u.to_string()),
            None => Url::parse(href).map(|u| u.to_string()),
        };
        let Ok(target) = resolved else { continue };
        if !target.starts_with("http://") && !target.starts_with("https://") {
            continue;
        }
        let normalized = normalize_url(&target);
        if seen.insert(normalized.clone()) {
            outlinks.push(normalized);
            if outlinks.len() >= MAX_OUTLINKS {
                break;
            }
        }
    }
    outlinks
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><title>  Food recall warnings  </title><style>p { color: red }</style></head>
<body>
  <nav><a href="/en/home.html">Home</a> site navigation junk</nav>
  <header role="banner">Government of Canada</header>
  <main>
    <h1>Food recall warnings</h1>
    <p>The Canadian Food Inspection Agency publishes recall warnings when
    products pose a risk to consumers. Always check the lot codes printed
    on the package before eating.</p>
    <a href="/en/recalls/details.html?id=9">Details</a>
    <a href="mailto:info@example.ca">Write us</a>
    <script>console.log("tracking")</script>
  </main>
  <footer>Terms and conditions</footer>
</body>
</html>"#;

    #[test]
    fn extracts_title_and_pruned_text() {
        let page = extract_page(PAGE, "https://www.canada.ca/en/recalls.html");
        assert_eq!(page.title.as_deref(), Some("Food recall warnings"));
        assert!(page.text.contains("recall warnings when"));
        assert!(!page.text.contains("site navigation junk"));
        assert!(!page.text.contains("Terms and conditions"));
        assert!(!page.text.contains("tracking"));
        assert!(!page.snippet.is_empty());
        assert!(page.snippet.chars().count() <= MAX_SNIPPET_CHARS);
    }

    #[test]
    fn detects_english() {
        let page = extract_page(PAGE, "https://www.canada.ca/en/recalls.html");
        assert_eq!(page.language.as_deref(), Some("eng"));
    }

    #[test]
    fn detects_french() {
        let html = r#"<html><body><main><p>L'Agence canadienne d'inspection des
        aliments publie des avis de rappel lorsque des produits présentent un
        risque pour les consommateurs. Vérifiez toujours les codes de lot
        imprimés sur l'emballage avant de consommer.</p></main></body></html>"#;
        let page = extract_page(html, "https://www.canada.ca/fr/rappels.html");
        assert_eq!(page.language.as_deref(), Some("fra"));
    }

    #[test]
    fn short_text_has_no_language() {
        let page = extract_page("<html><body>ok</body></html>", "https://example.ca/");
        assert!(page.language.is_none());
    }

    #[test]
    fn outlinks_are_absolutized_and_schemes_filtered() {
        let page = extract_page(PAGE, "https://www.canada.ca/en/recalls.html");
        assert!(page
            .outlinks
            .contains(&"https://www.canada.ca/en/recalls/details.html?id=9".to_string()));
        assert!(page.outlinks.iter().all(|l| l.starts_with("https://")));
        assert!(!page.outlinks.iter().any(|l| l.contains("mailto")));
    }

    #[test]
    fn outlinks_cap_and_dedup() {
        let mut html = String::from("<html><body><main>");
        for i in 0..400 {
            html.push_str(&format!("<a href=\"/page-{}.html\">x</a>", i % 300));
        }
        html.push_str("</main></body></html>");
        let page = extract_page(&html, "https://example.ca/");
        assert_eq!(page.outlinks.len(), MAX_OUTLINKS);
    }

    #[test]
    fn archived_notice_detection_is_bilingual() {
        let en = r#"<html><head><title>Old guidance</title></head>
        <body><div class="alert">This page has been archived on the Web.</div></body></html>"#;
        assert_eq!(extract_page(en, "https://example.ca/").is_archived, Some(true));

        let fr = r#"<html><body><div>Cette page a été archivée dans le Web.</div></body></html>"#;
        assert_eq!(extract_page(fr, "https://example.ca/").is_archived, Some(true));

        let current = r#"<html><body><div>This page is current as of today.</div></body></html>"#;
        assert_eq!(extract_page(current, "https://example.ca/").is_archived, Some(false));

        assert_eq!(extract_page(PAGE, "https://example.ca/").is_archived, None);
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = extract_page(PAGE, "https://example.ca/");
        let b = extract_page(PAGE, "https://example.ca/");
        assert_eq!(a.content_hash, b.content_hash);

        let changed = PAGE.replace("lot codes", "batch codes");
        let c = extract_page(&changed, "https://example.ca/");
        assert_ne!(a.content_hash, c.content_hash);
    }

    #[test]
    fn empty_document_hashes_empty_input() {
        let page = extract_page("", "https://example.ca/");
        assert!(page.text.is_empty());
        assert!(page.language.is_none());
        // SHA-256 of zero bytes.
        assert_eq!(
            page.content_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn text_is_capped_at_four_kib() {
        let mut html = String::from("<html><body><main><p>");
        html.push_str(&"word ".repeat(5000));
        html.push_str("</p></main></body></html>");
        let page = extract_page(&html, "https://example.ca/");
        assert!(page.text.len() <= MAX_TEXT_BYTES);
    }
}
