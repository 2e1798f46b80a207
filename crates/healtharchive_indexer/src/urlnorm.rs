//! URL normalization and page grouping.
//!
//! `normalize_url` makes equivalent captures compare equal (host case,
//! fragments, tracking params, query order). `url_group` goes further and
//! collapses captures of "the same page" across time by also dropping
//! pagination and session parameters; it keys the pages aggregate and the
//! link signals.

use url::Url;

/// Query parameters that never change page identity.
const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "mc_cid", "mc_eid", "msclkid", "wbdisable"];

/// Parameters dropped only for grouping.
const GROUPING_PARAMS: &[&str] = &[
    "page",
    "p",
    "offset",
    "start",
    "session",
    "sessionid",
    "sid",
    "jsessionid",
    "phpsessid",
];

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

fn is_grouping_param(name: &str) -> bool {
    GROUPING_PARAMS.contains(&name.to_ascii_lowercase().as_str())
}

fn rebuild(url: &mut Url, mut params: Vec<(String, String)>) {
    params.sort();
    if params.is_empty() {
        url.set_query(None);
    } else {
        let query = params
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }
}

/// Canonical form of a captured URL.
///
/// Unparseable input comes back unchanged; a capture is still a capture.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    url.set_fragment(None);

    let params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();
    rebuild(&mut url, params);

    url.to_string()
}

/// Grouping key over the normalized URL: drops pagination/session params
/// and the trailing slash so revisits land in the same bucket.
pub fn url_group(normalized: &str) -> String {
    let Ok(mut url) = Url::parse(normalized) else {
        return normalized.to_string();
    };

    let params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_grouping_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    rebuild(&mut url, params);

    let mut text = url.to_string();
    if text.ends_with('/') && url.path() != "/" {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_lowercased_and_fragment_dropped() {
        assert_eq!(
            normalize_url("https://WWW.Canada.CA/en/page.html#section"),
            "https://www.canada.ca/en/page.html"
        );
    }

    #[test]
    fn tracking_params_dropped_and_rest_sorted() {
        assert_eq!(
            normalize_url("https://example.ca/p?utm_source=x&b=2&a=1&fbclid=zzz"),
            "https://example.ca/p?a=1&b=2"
        );
    }

    #[test]
    fn query_free_urls_have_no_question_mark() {
        assert_eq!(
            normalize_url("https://example.ca/p?utm_source=x"),
            "https://example.ca/p"
        );
    }

    #[test]
    fn grouping_drops_pagination_and_sessions() {
        let normalized = normalize_url("https://example.ca/news?page=3&topic=flu");
        assert_eq!(url_group(&normalized), "https://example.ca/news?topic=flu");

        let normalized = normalize_url("https://example.ca/news?sessionid=abc");
        assert_eq!(url_group(&normalized), "https://example.ca/news");
    }

    #[test]
    fn grouping_strips_trailing_slash_but_keeps_root() {
        assert_eq!(url_group("https://example.ca/news/"), "https://example.ca/news");
        assert_eq!(url_group("https://example.ca/"), "https://example.ca/");
    }

    #[test]
    fn unparseable_input_passes_through() {
        assert_eq!(normalize_url("not a url"), "not a url");
        assert_eq!(url_group("not a url"), "not a url");
    }

    #[test]
    fn same_page_revisits_share_a_group() {
        let a = url_group(&normalize_url("https://example.ca/flu?page=1"));
        let b = url_group(&normalize_url("https://example.ca/flu?page=2&utm_campaign=fall"));
        assert_eq!(a, b);
    }
}
