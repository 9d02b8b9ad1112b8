use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Text anywhere on the page that rules the product out.
const OUT_OF_STOCK_MARKERS: &[&str] = &["notify me when in stock", "out of stock", "sold out"];

const ADD_TO_CART_PHRASES: &[&str] = &["add to cart", "add to basket", "add to bag"];

/// Elements that can carry an actionable add-to-cart control.
const ACTION_SELECTOR: &str =
    "button, a, component, [role=button], input[type=submit], input[type=button]";

/// Elements whose text is never rendered.
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

const TITLE_SELECTORS: &[&str] = &[
    "h1.product__name",
    "h1[itemprop=name]",
    "meta[property='og:title']",
    "h1",
    "title",
];

const PRICE_SELECTORS: &[&str] = &[
    ".product__price",
    "[itemprop=price]",
    "div[class*=price], span[class*=price]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Unavailable,
    Unknown,
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityStatus::Available => write!(f, "available"),
            AvailabilityStatus::Unavailable => write!(f, "unavailable"),
            AvailabilityStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which heuristic decided the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    OutOfStockText,
    OutOfStockTracking,
    AddToCart,
    InStockText,
    InStockStructuredData,
    InStockTracking,
    NoMatch,
    FetchFailed,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::OutOfStockText => "out-of-stock marker",
            Signal::OutOfStockTracking => "out-of-stock tracking attribute",
            Signal::AddToCart => "add-to-cart element",
            Signal::InStockText => "in-stock marker",
            Signal::InStockStructuredData => "in-stock structured data",
            Signal::InStockTracking => "in-stock tracking attribute",
            Signal::NoMatch => "no heuristic matched",
            Signal::FetchFailed => "fetch failed",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub status: AvailabilityStatus,
    pub confidence_signal: Signal,
    pub product_title: Option<String>,
    pub product_price: Option<String>,
}

impl AvailabilityResult {
    pub fn fetch_failed() -> Self {
        Self {
            status: AvailabilityStatus::Unknown,
            confidence_signal: Signal::FetchFailed,
            product_title: None,
            product_price: None,
        }
    }
}

/// A parsed page plus the derived views the rules look at.
pub struct PageView {
    document: Html,
    raw: String,
    text_nodes: Vec<String>,
    visible_text: String,
}

impl PageView {
    pub fn parse(html: &str) -> Self {
        // html5ever recovers from any malformed input; broken fragments just
        // produce fewer elements
        let document = Html::parse_document(html);
        let mut text_nodes = Vec::new();
        collect_text_nodes(document.root_element(), &mut text_nodes);
        let visible_text = text_nodes.join(" ");
        Self {
            document,
            raw: html.to_string(),
            text_nodes,
            visible_text,
        }
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    /// Rendered text, lowercased with whitespace collapsed.
    pub fn visible_text(&self) -> &str {
        &self.visible_text
    }

    /// Each rendered text node, normalized like [`PageView::visible_text`].
    pub fn text_nodes(&self) -> &[String] {
        &self.text_nodes
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Elements matching `selector`; an unparseable selector matches nothing.
    fn select<'a>(&'a self, selector: &str) -> Vec<ElementRef<'a>> {
        match Selector::parse(selector) {
            Ok(selector) => self.document.select(&selector).collect(),
            Err(e) => {
                debug!(selector, error = ?e, "Skipping unparseable selector");
                Vec::new()
            }
        }
    }
}

fn collect_text_nodes(element: ElementRef<'_>, out: &mut Vec<String>) {
    if HIDDEN_TAGS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let text = normalize(text);
                if !text.is_empty() {
                    out.push(text);
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text_nodes(child, out);
                }
            }
            _ => {}
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// One entry of the ordered rule list: the first predicate that holds decides.
pub struct Rule {
    pub signal: Signal,
    pub status: AvailabilityStatus,
    pub predicate: fn(&PageView) -> bool,
}

/// Rules in priority order. An out-of-stock marker beats an add-to-cart
/// control because stores often ship both and toggle them with JavaScript.
pub const RULES: &[Rule] = &[
    Rule {
        signal: Signal::OutOfStockText,
        status: AvailabilityStatus::Unavailable,
        predicate: has_out_of_stock_text,
    },
    Rule {
        signal: Signal::OutOfStockTracking,
        status: AvailabilityStatus::Unavailable,
        predicate: has_out_of_stock_tracking,
    },
    Rule {
        signal: Signal::AddToCart,
        status: AvailabilityStatus::Available,
        predicate: has_add_to_cart,
    },
    Rule {
        signal: Signal::InStockText,
        status: AvailabilityStatus::Available,
        predicate: has_in_stock_text,
    },
    Rule {
        signal: Signal::InStockStructuredData,
        status: AvailabilityStatus::Available,
        predicate: has_in_stock_structured_data,
    },
    Rule {
        signal: Signal::InStockTracking,
        status: AvailabilityStatus::Available,
        predicate: has_in_stock_tracking,
    },
];

pub fn has_out_of_stock_text(page: &PageView) -> bool {
    OUT_OF_STOCK_MARKERS
        .iter()
        .any(|marker| page.visible_text().contains(marker))
}

fn tracking_regex(value: &str) -> Regex {
    // Analytics data layers, e.g. {'dimension25':'out of stock'}
    Regex::new(&format!(r#"(?i)['"]dimension25['"]\s*:\s*['"]{}['"]"#, value))
        .expect("tracking pattern is a valid regex")
}

pub fn has_out_of_stock_tracking(page: &PageView) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| tracking_regex("out of stock"))
        .is_match(page.raw())
}

pub fn has_in_stock_tracking(page: &PageView) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| tracking_regex("in stock"))
        .is_match(page.raw())
}

fn is_rendered(element: &ElementRef<'_>) -> bool {
    !element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|el| HIDDEN_TAGS.contains(&el.name()))
            .unwrap_or(false)
    })
}

pub fn has_add_to_cart(page: &PageView) -> bool {
    page.select(ACTION_SELECTOR).iter().any(|element| {
        let el = element.value();
        if el.attr("disabled").is_some()
            || el.attr("aria-disabled").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
            || !is_rendered(element)
        {
            return false;
        }

        // Only what a shopper sees: the element text, or the caption of an input
        let mut label = element_text(element);
        if let Some(value) = el.attr("value") {
            label.push(' ');
            label.push_str(value);
        }
        let label = normalize(&label);
        ADD_TO_CART_PHRASES.iter().any(|phrase| label.contains(phrase))
    })
}

/// A short confirmation such as "In stock!" or a bare "In stock" badge.
/// Qualified phrases ("in stock soon", "in stock: 0") don't count.
pub fn has_in_stock_text(page: &PageView) -> bool {
    page.text_nodes().iter().any(|text| {
        if text.len() > 48 {
            return false;
        }
        let bare = text.trim_matches(|c: char| c.is_whitespace() || matches!(c, '!' | '.' | '\u{2713}' | '\u{2714}'));
        bare == "in stock" || text.contains("in stock!")
    })
}

pub fn has_in_stock_structured_data(page: &PageView) -> bool {
    page.select("[itemprop=availability]").iter().any(|element| {
        let el = element.value();
        el.attr("href")
            .or_else(|| el.attr("content"))
            .map(|v| v.to_ascii_lowercase().ends_with("instock"))
            .unwrap_or(false)
    })
}

/// Best-effort product name; `None` when nothing usable is on the page.
pub fn extract_title(page: &PageView) -> Option<String> {
    TITLE_SELECTORS.iter().find_map(|selector| {
        page.select(selector).into_iter().find_map(|element| {
            let text = if element.value().name() == "meta" {
                element.value().attr("content").unwrap_or_default().trim().to_string()
            } else {
                element_text(&element)
            };
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!text.is_empty()).then_some(text)
        })
    })
}

fn price_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$[\d,]+\.?\d*").expect("price pattern is a valid regex"))
}

/// Best-effort display price such as `$1,299.99`.
pub fn extract_price(page: &PageView) -> Option<String> {
    PRICE_SELECTORS.iter().find_map(|selector| {
        page.select(selector).into_iter().find_map(|element| {
            if element.value().name() == "meta" {
                return element
                    .value()
                    .attr("content")
                    .map(str::trim)
                    .filter(|content| !content.is_empty())
                    .map(|content| format!("${}", content));
            }

            let text = element_text(&element);
            if text.is_empty() {
                return None;
            }
            match price_regex().find(&text) {
                Some(m) => Some(m.as_str().to_string()),
                None => {
                    debug!(selector, text = %text, "No currency amount in price element");
                    Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
                }
            }
        })
    })
}

/// Classifies a product page. Rules run in order and the first match wins;
/// title and price lookups never influence the status.
pub fn classify(html: &str) -> AvailabilityResult {
    let page = PageView::parse(html);

    let (status, signal) = RULES
        .iter()
        .find(|rule| (rule.predicate)(&page))
        .map(|rule| (rule.status, rule.signal))
        .unwrap_or((AvailabilityStatus::Unknown, Signal::NoMatch));

    let result = AvailabilityResult {
        status,
        confidence_signal: signal,
        product_title: extract_title(&page),
        product_price: extract_price(&page),
    };

    info!(
        status = %result.status,
        signal = %result.confidence_signal,
        title = result.product_title.as_deref().unwrap_or("-"),
        price = result.product_price.as_deref().unwrap_or("-"),
        "Classified product page"
    );

    result
}
