//! Listing page parser
//!
//! A listing page contributes two things to discovery:
//! - product links (`article.product_pod h3 a[href]`)
//! - the link to the next listing page (`li.next a[href]`)
//!
//! A page without a next link is the last one.

use crate::url::resolve_link;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

const PRODUCT_LINK: &str = "article.product_pod h3 a[href]";
const NEXT_LINK: &str = "li.next a[href]";

/// Links found on one listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Product page URLs in page order, without repeats
    pub product_links: Vec<Url>,

    /// Next listing page, if the page has one
    pub next_page: Option<Url>,
}

/// Parses a listing page body
///
/// Relative links are resolved against `page_url`. Links that do not resolve
/// to an HTTP(S) URL are dropped.
///
/// # Example
///
/// ```
/// use catalog_harvest::crawler::parse_listing;
/// use url::Url;
///
/// let html = r#"<article class="product_pod"><h3><a href="a-light_1000/index.html">A Light</a></h3></article>
///   <ul class="pager"><li class="next"><a href="page-2.html">next</a></li></ul>"#;
/// let page_url = Url::parse("https://books.toscrape.com/catalogue/page-1.html").unwrap();
/// let page = parse_listing(html, &page_url);
/// assert_eq!(page.product_links.len(), 1);
/// assert_eq!(
///     page.next_page.unwrap().as_str(),
///     "https://books.toscrape.com/catalogue/page-2.html"
/// );
/// ```
pub fn parse_listing(html: &str, page_url: &Url) -> ListingPage {
    let document = Html::parse_document(html);

    ListingPage {
        product_links: extract_product_links(&document, page_url),
        next_page: extract_next_page(&document, page_url),
    }
}

fn extract_product_links(document: &Html, page_url: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse(PRODUCT_LINK) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(href, page_url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

fn extract_next_page(document: &Html, page_url: &Url) -> Option<Url> {
    let selector = Selector::parse(NEXT_LINK).ok()?;

    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| resolve_link(href, page_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://books.toscrape.com/catalogue/page-2.html").unwrap()
    }

    fn pod(href: &str) -> String {
        format!(
            r#"<article class="product_pod"><h3><a href="{}" title="t">t</a></h3></article>"#,
            href
        )
    }

    #[test]
    fn test_relative_product_links() {
        let html = format!("<ol>{}{}</ol>", pod("a_1/index.html"), pod("b_2/index.html"));
        let page = parse_listing(&html, &page_url());

        let links: Vec<&str> = page.product_links.iter().map(Url::as_str).collect();
        assert_eq!(
            links,
            vec![
                "https://books.toscrape.com/catalogue/a_1/index.html",
                "https://books.toscrape.com/catalogue/b_2/index.html",
            ]
        );
    }

    #[test]
    fn test_repeated_product_links_collapsed() {
        let html = format!("{}{}", pod("a_1/index.html"), pod("a_1/index.html#reviews"));
        let page = parse_listing(&html, &page_url());
        assert_eq!(page.product_links.len(), 1);
    }

    #[test]
    fn test_links_outside_product_pods_ignored() {
        let html = format!(
            r#"<a href="/sidebar.html">Travel</a>{}<div class="image_container"><a href="x.html">img</a></div>"#,
            pod("a_1/index.html")
        );
        let page = parse_listing(&html, &page_url());
        assert_eq!(page.product_links.len(), 1);
    }

    #[test]
    fn test_next_page() {
        let html = r#"<ul class="pager"><li class="previous"><a href="page-1.html">previous</a></li>
            <li class="next"><a href="page-3.html">next</a></li></ul>"#;
        let page = parse_listing(html, &page_url());
        assert_eq!(
            page.next_page.unwrap().as_str(),
            "https://books.toscrape.com/catalogue/page-3.html"
        );
    }

    #[test]
    fn test_last_page_has_no_next() {
        let html = format!(
            r#"{}<ul class="pager"><li class="previous"><a href="page-1.html">previous</a></li></ul>"#,
            pod("a_1/index.html")
        );
        let page = parse_listing(&html, &page_url());
        assert!(page.next_page.is_none());
    }

    #[test]
    fn test_unusable_links_dropped() {
        let html = format!("{}{}", pod("javascript:void(0)"), pod("#top"));
        let page = parse_listing(&html, &page_url());
        assert!(page.product_links.is_empty());
    }

    #[test]
    fn test_empty_body() {
        let page = parse_listing("", &page_url());
        assert_eq!(page, ListingPage::default());
    }
}
