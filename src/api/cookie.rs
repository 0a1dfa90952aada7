//! Client-side cookie handling for cookie-mode sessions
//!
//! The server may fold several cookies into one `Set-Cookie` value, and the
//! `expires=Mon, 24 Jan 2005 ...` attribute itself contains a comma, so a naive
//! split on ',' would cut dates in half.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    /// Fold one raw `Set-Cookie` value into the jar. Deleted cookies are ignored.
    pub fn accept(&mut self, raw: &str) {
        for cookie in split_set_cookie(raw) {
            if cookie.contains("deleted") {
                continue;
            }
            let pair = cookie.split(';').next().unwrap_or("").trim();
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            self.cookies.insert(key.to_string(), value.trim().to_string());
        }
    }

    /// `Cookie` header value, keys sorted.
    pub fn header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Split a combined `Set-Cookie` value into individual cookies.
fn split_set_cookie(raw: &str) -> Vec<String> {
    let mut cookies: Vec<String> = Vec::new();
    for segment in raw.split(',') {
        match cookies.last_mut() {
            Some(previous) if ends_with_weekday_expiry(previous) => {
                previous.push(',');
                previous.push_str(segment);
            }
            _ => cookies.push(segment.to_string()),
        }
    }
    cookies.into_iter().map(|c| c.trim().to_string()).collect()
}

/// True when the text ends in `expires=Www`, i.e. the comma that follows
/// belongs to a date.
fn ends_with_weekday_expiry(text: &str) -> bool {
    let last_attr = text.rsplit(';').next().unwrap_or("").trim();
    let Some((name, value)) = last_attr.split_once('=') else {
        return false;
    };
    name.trim().eq_ignore_ascii_case("expires")
        && value.trim().len() == 3
        && value.trim().chars().all(|c| c.is_ascii_alphabetic())
}
