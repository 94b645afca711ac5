use url::Url;

/// Returns N for a listing URL whose last path segment is `page-N.html`
pub fn listing_page_number(url: &Url) -> Option<u32> {
    let segment = url.path_segments()?.last()?;
    segment
        .strip_prefix("page-")?
        .strip_suffix(".html")?
        .parse()
        .ok()
}

/// Derives the listing page after `url` from the `page-N.html` pattern
///
/// Used only when a listing page could not be read, so its "next" link is
/// unknown. Returns None for URLs that do not follow the pattern.
pub fn next_listing_page(url: &Url) -> Option<Url> {
    let number = listing_page_number(url)?;
    url.join(&format!("page-{}.html", number + 1)).ok()
}
