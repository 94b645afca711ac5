//! Product page parser
//!
//! Field positions follow the catalog's product template:
//!
//! | Field            | Location                                         |
//! |------------------|--------------------------------------------------|
//! | `name`           | `div.product_main h1`                            |
//! | `availability`   | `div.product_main p.availability`                |
//! | `upc`            | product information table, row `UPC`             |
//! | `price_excl_tax` | product information table, row `Price (excl. tax)` |
//! | `tax`            | product information table, row `Tax`             |

use crate::extract::normalize::{canonical_key, collapse_whitespace, parse_price};
use crate::extract::record::{Availability, Record};
use crate::extract::Rejection;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

const INFO_TABLE: &str = "table.table.table-striped";
const NAME: &str = "div.product_main h1";
const AVAILABILITY: &str = "div.product_main p.availability";
const AVAILABILITY_FALLBACK: &str = "p.availability";

const UPC_ROW: &str = "UPC";
const PRICE_EXCL_ROW: &str = "Price (excl. tax)";
const TAX_ROW: &str = "Tax";

/// Extracts, validates, and normalizes one product document
///
/// # Steps
///
/// 1. Decode and parse the body; a body that is not UTF-8, is blank, or has
///    no product information table is `MalformedDocument`
/// 2. Locate every required field; the first absent one is `MissingField`
/// 3. Normalize prices, availability, and the natural key; the first value
///    that does not normalize is `InvalidValue`
///
/// Duplicate detection is not done here; see [`crate::endpoint`].
///
/// # Example
///
/// ```
/// use catalog_harvest::extract::extract_record;
///
/// let html = r#"<div class="product_main"><h1>Tipping the Velvet</h1>
///   <p class="instock availability">In stock (20 available)</p></div>
///   <table class="table table-striped">
///     <tr><th>UPC</th><td>90fa61229261140a</td></tr>
///     <tr><th>Price (excl. tax)</th><td>£53.74</td></tr>
///     <tr><th>Tax</th><td>£0.00</td></tr>
///   </table>"#;
/// let record = extract_record(html.as_bytes()).unwrap();
/// assert_eq!(record.upc, "90fa61229261140a");
/// ```
pub fn extract_record(body: &[u8]) -> Result<Record, Rejection> {
    let html = std::str::from_utf8(body)
        .map_err(|e| Rejection::malformed(format!("body is not valid UTF-8: {}", e)))?;

    if html.trim().is_empty() {
        return Err(Rejection::malformed("empty document"));
    }

    let document = Html::parse_document(html);

    let table = first_element(&document, INFO_TABLE)
        .ok_or_else(|| Rejection::malformed("product information table not found"))?;
    let info = read_info_table(table);

    // Locate
    let name = first_text(&document, NAME).ok_or_else(|| Rejection::missing("name"))?;
    let availability_text = first_text(&document, AVAILABILITY)
        .or_else(|| first_text(&document, AVAILABILITY_FALLBACK))
        .ok_or_else(|| Rejection::missing("availability"))?;
    let raw_upc = non_empty(&info, UPC_ROW).ok_or_else(|| Rejection::missing("upc"))?;
    let raw_price =
        non_empty(&info, PRICE_EXCL_ROW).ok_or_else(|| Rejection::missing("price_excl_tax"))?;
    let raw_tax = non_empty(&info, TAX_ROW).ok_or_else(|| Rejection::missing("tax"))?;

    // Normalize
    let upc = canonical_key(raw_upc).ok_or_else(|| Rejection::invalid("upc"))?;
    let price_excl_tax = parse_price(raw_price).ok_or_else(|| Rejection::invalid("price_excl_tax"))?;
    let tax = parse_price(raw_tax).ok_or_else(|| Rejection::invalid("tax"))?;
    let availability = availability_text
        .parse::<Availability>()
        .unwrap_or(Availability::Other(availability_text));

    Ok(Record {
        name,
        availability,
        upc,
        price_excl_tax,
        tax,
    })
}

fn first_element<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

/// Whitespace-collapsed text of the first match, if it is not empty
fn first_text(document: &Html, css: &str) -> Option<String> {
    first_element(document, css)
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

/// Reads `<tr><th>label</th><td>value</td></tr>` rows into a map
fn read_info_table(table: ElementRef<'_>) -> HashMap<String, String> {
    let mut info = HashMap::new();

    let (Ok(row_selector), Ok(th_selector), Ok(td_selector)) = (
        Selector::parse("tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) else {
        return info;
    };

    for row in table.select(&row_selector) {
        let header = row.select(&th_selector).next();
        let value = row.select(&td_selector).next();
        if let (Some(header), Some(value)) = (header, value) {
            info.insert(
                collapse_whitespace(&header.text().collect::<String>()),
                collapse_whitespace(&value.text().collect::<String>()),
            );
        }
    }

    info
}

fn non_empty<'a>(info: &'a HashMap<String, String>, label: &str) -> Option<&'a str> {
    info.get(label)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}
