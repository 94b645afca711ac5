//! URL handling module for Catalog-Harvest
//!
//! This module provides URL normalization for discovered product links,
//! resolution of relative hrefs found on listing pages, and the
//! `page-N.html` arithmetic used when a listing page cannot be read.

mod normalize;
mod paging;

pub use normalize::{normalize_url, resolve_link};
pub use paging::{listing_page_number, next_listing_page};
