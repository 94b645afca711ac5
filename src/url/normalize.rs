use crate::UrlError;
use url::Url;

/// Query parameters that never change which document a catalog URL names
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "ref", "source"];

/// Normalizes a catalog URL so the same document is always named the same way
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Require an HTTP(S) scheme and a host
/// 3. Lowercase the host (the `url` crate already does this for special schemes)
/// 4. Remove the fragment
/// 5. Remove tracking query parameters (`utm_*` and friends)
/// 6. Sort remaining query parameters; drop an empty query string
///
/// Paths are left alone apart from dot-segment resolution done by the parser,
/// since catalog servers treat `/index.html` and `/` differently.
///
/// # Examples
///
/// ```
/// use catalog_harvest::url::normalize_url;
///
/// let url = normalize_url("https://BOOKS.toscrape.com/catalogue/a/../b/index.html#top").unwrap();
/// assert_eq!(url.as_str(), "https://books.toscrape.com/catalogue/b/index.html");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Resolves a link href against the page it was found on
///
/// Returns None if the link should be excluded:
/// - empty and fragment-only hrefs
/// - javascript:, mailto:, tel:, data: schemes
/// - anything that fails to normalize
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    normalize_url(absolute.as_str()).ok()
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
