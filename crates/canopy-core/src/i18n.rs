//! Locale catalog and language negotiation.
//!
//! The error translator localizes human-readable failure text using a
//! [`Catalog`] of per-locale message tables. Lookup is by exact source
//! message; a missing locale or message falls back to the original text,
//! so translation can never fail a request.

use std::collections::HashMap;

/// A table of message translations keyed by locale.
///
/// # Example
///
/// ```rust
/// use canopy_core::Catalog;
///
/// let catalog = Catalog::new()
///     .with_messages("fr", [("cluster not found", "cluster introuvable")]);
///
/// assert_eq!(catalog.translate("fr", "cluster not found"), "cluster introuvable");
/// // Unknown locale or message falls back to the original.
/// assert_eq!(catalog.translate("de", "cluster not found"), "cluster not found");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    messages: HashMap<String, HashMap<String, String>>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds message translations for a locale.
    pub fn add_messages<K, V>(
        &mut self,
        locale: impl Into<String>,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        let table = self.messages.entry(locale.into()).or_default();
        for (source, translated) in pairs {
            table.insert(source.into(), translated.into());
        }
    }

    /// Adds message translations for a locale, builder-style.
    #[must_use]
    pub fn with_messages<K, V>(
        mut self,
        locale: impl Into<String>,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.add_messages(locale, pairs);
        self
    }

    /// Returns the locales this catalog has translations for.
    pub fn available_locales(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    /// Returns `true` if no translations are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Translates `text` into `locale`.
    ///
    /// Falls back to the primary language subtag ("fr-CA" → "fr") and then
    /// to the untranslated text.
    #[must_use]
    pub fn translate<'a>(&'a self, locale: &str, text: &'a str) -> &'a str {
        if let Some(translated) = self.lookup(locale, text) {
            return translated;
        }
        if let Some(primary) = locale.split('-').next() {
            if primary != locale {
                if let Some(translated) = self.lookup(primary, text) {
                    return translated;
                }
            }
        }
        text
    }

    fn lookup(&self, locale: &str, text: &str) -> Option<&str> {
        self.messages
            .get(locale)
            .and_then(|table| table.get(text))
            .map(String::as_str)
    }

    /// Determines the best available locale from an Accept-Language header.
    ///
    /// Returns `None` when the header matches none of the catalog's locales
    /// (or the catalog is empty), in which case messages stay untranslated.
    #[must_use]
    pub fn best_match_language(&self, accept_language: &str) -> Option<String> {
        let available: Vec<&str> = self.messages.keys().map(String::as_str).collect();
        best_match(accept_language, &available).map(ToString::to_string)
    }
}

/// Picks the best entry from `supported` for an Accept-style header value.
///
/// Entries are ranked by their `q` weight (default 1.0); a weight of zero
/// excludes the tag. `*` matches the first supported entry. A tag matches a
/// supported entry when equal case-insensitively or when its primary
/// subtag does ("fr-CA" matches "fr").
#[must_use]
pub fn best_match<'a>(header: &str, supported: &[&'a str]) -> Option<&'a str> {
    let mut candidates: Vec<(f32, &str)> = header
        .split(',')
        .filter_map(parse_weighted)
        .filter(|(q, _)| *q > 0.0)
        .collect();
    // Stable sort keeps header order for equal weights.
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    for (_, tag) in candidates {
        if tag == "*" {
            return supported.first().copied();
        }
        for &entry in supported {
            if tag.eq_ignore_ascii_case(entry) {
                return Some(entry);
            }
            if let Some(primary) = tag.split('-').next() {
                if primary.eq_ignore_ascii_case(entry) {
                    return Some(entry);
                }
            }
        }
    }
    None
}

/// Parses one `tag;q=0.8` element into `(weight, tag)`.
fn parse_weighted(element: &str) -> Option<(f32, &str)> {
    let mut parts = element.split(';');
    let tag = parts.next()?.trim();
    if tag.is_empty() {
        return None;
    }
    let mut weight = 1.0f32;
    for param in parts {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("q=") {
            weight = value.trim().parse().unwrap_or(0.0);
        }
    }
    Some((weight, tag))
}
