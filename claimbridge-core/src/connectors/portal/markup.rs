//! Scraping helpers for portal pages.
//!
//! Portals have no schema. Everything here works on raw markup with
//! forgiving patterns and returns `None` when a page does not contain what we
//! expect, leaving the caller to decide whether that is a failure.

use claimbridge_model::RejectionReason;
use once_cell::sync::Lazy;
use regex::Regex;

static INPUT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<input\b([^>]*)>").expect("input tag regex should compile")
});
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("attribute regex should compile")
});
static CONFIRMATION_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)data-confirmation(?:-number)?\s*=\s*"([^"]+)""#)
        .expect("confirmation attribute regex should compile")
});
static CONFIRMATION_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)confirmation\s*(?:number|no\.?|#)\s*:?\s*(?:<[^>]+>\s*)*([A-Z0-9][A-Z0-9-]{3,})",
    )
    .expect("confirmation text regex should compile")
});
static REJECTION_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<(li|div|p|span)\b([^>]*\brejection-reason\b[^>]*)>(.*?)</(?:li|div|p|span)>",
    )
    .expect("rejection item regex should compile")
});
static REJECTION_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<[a-z]+\b[^>]*class\s*=\s*"[^"]*\bclaim-rejected\b[^"]*"[^>]*>(.*?)</[a-z]+>"#,
    )
    .expect("rejection banner regex should compile")
});
static LOGIN_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<[a-z]+\b[^>]*class\s*=\s*"[^"]*\b(?:login-error|validation-summary-errors)\b[^"]*"[^>]*>(.*?)</[a-z]+>"#,
    )
    .expect("login error regex should compile")
});
static STATUS_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)data-claim-status\s*=\s*"([^"]+)""#)
        .expect("status attribute regex should compile")
});
static STATUS_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)claim\s+status\s*:?\s*(?:<[^>]+>\s*)*([A-Za-z][A-Za-z ]*[A-Za-z])")
        .expect("status text regex should compile")
});
static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex should compile"));
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex should compile"));

fn attributes(fragment: &str) -> impl Iterator<Item = (String, String)> + '_ {
    ATTRIBUTE.captures_iter(fragment).map(|caps| {
        let name = caps[1].to_ascii_lowercase();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        (name, value)
    })
}

fn attribute(fragment: &str, name: &str) -> Option<String> {
    attributes(fragment).find(|(n, _)| n == name).map(|(_, v)| v)
}

/// Visible text with tags removed and whitespace collapsed.
pub fn text_content(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

/// Value of the `<input>` named `name`, typically a hidden anti-forgery
/// token.
pub fn hidden_input_value(html: &str, name: &str) -> Option<String> {
    INPUT_TAG.captures_iter(html).find_map(|caps| {
        let tag = caps.get(1)?.as_str();
        if attribute(tag, "name").as_deref() != Some(name) {
            return None;
        }
        attribute(tag, "value").filter(|v| !v.is_empty())
    })
}

pub fn is_login_page(html: &str) -> bool {
    INPUT_TAG.captures_iter(html).any(|caps| {
        caps.get(1)
            .and_then(|tag| attribute(tag.as_str(), "type"))
            .is_some_and(|t| t.eq_ignore_ascii_case("password"))
    })
}

pub fn login_error(html: &str) -> Option<String> {
    let caps = LOGIN_ERROR.captures(html)?;
    let text = text_content(&caps[1]);
    (!text.is_empty()).then_some(text)
}

pub fn confirmation_number(html: &str) -> Option<String> {
    if let Some(caps) = CONFIRMATION_ATTR.captures(html) {
        let value = caps[1].trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    CONFIRMATION_TEXT
        .captures(html)
        .map(|caps| caps[1].to_string())
}

/// Coded reasons when the page reports a rejected claim.
pub fn rejection_reasons(html: &str) -> Option<Vec<RejectionReason>> {
    let items: Vec<RejectionReason> = REJECTION_ITEM
        .captures_iter(html)
        .map(|caps| {
            let code = attribute(&caps[2], "data-code")
                .unwrap_or_else(|| "PORTAL".to_string());
            RejectionReason::new(code, text_content(&caps[3]))
        })
        .collect();
    if !items.is_empty() {
        return Some(items);
    }
    REJECTION_BANNER.captures(html).map(|caps| {
        vec![RejectionReason::new(
            "PORTAL_REJECTED",
            text_content(&caps[1]),
        )]
    })
}

/// Raw status label as shown on a claim page, lowercased.
pub fn claim_status(html: &str) -> Option<String> {
    STATUS_ATTR
        .captures(html)
        .or_else(|| STATUS_TEXT.captures(html))
        .map(|caps| caps[1].trim().to_ascii_lowercase())
}
