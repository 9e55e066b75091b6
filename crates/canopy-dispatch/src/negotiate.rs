//! Response content negotiation.
//!
//! The response format is chosen from an explicit override query parameter
//! when present (legacy clients set `ContentType=JSON` and expect it to
//! beat the Accept header), and otherwise by best-match negotiation of the
//! Accept header against the supported format list.

use canopy_core::ContentFormat;

/// Query parameter that overrides standard content negotiation.
pub const FORMAT_OVERRIDE_PARAM: &str = "ContentType";

/// Determines the response format for a request.
///
/// `override_value` is the value of the [`FORMAT_OVERRIDE_PARAM`] query
/// parameter, if present; it takes priority over the Accept header. An
/// unrecognized override value falls through to header negotiation, and
/// the absence of any usable preference yields the default format.
///
/// # Example
///
/// ```rust
/// use canopy_core::ContentFormat;
/// use canopy_dispatch::negotiate_format;
///
/// // The override wins even when the Accept header asks for XML.
/// let format = negotiate_format(Some("JSON"), Some("application/xml"));
/// assert_eq!(format, ContentFormat::Json);
/// ```
#[must_use]
pub fn negotiate_format(override_value: Option<&str>, accept: Option<&str>) -> ContentFormat {
    if let Some(value) = override_value {
        if let Some(format) = format_from_override(value) {
            return format;
        }
    }
    accept
        .and_then(best_match_media_type)
        .unwrap_or_default()
}

/// Resolves an override parameter value to a format.
fn format_from_override(value: &str) -> Option<ContentFormat> {
    if value.eq_ignore_ascii_case("json") {
        return Some(ContentFormat::Json);
    }
    ContentFormat::from_mime(value)
}

/// Picks the best supported format for an Accept header.
fn best_match_media_type(accept: &str) -> Option<ContentFormat> {
    let mut candidates: Vec<(f32, &str)> = accept
        .split(',')
        .filter_map(parse_media_range)
        .filter(|(q, _)| *q > 0.0)
        .collect();
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    for (_, range) in candidates {
        for format in ContentFormat::SUPPORTED {
            if media_range_matches(range, format.mime()) {
                return Some(format);
            }
        }
    }
    None
}

/// Parses one `type/subtype;q=0.8` element into `(weight, media range)`.
fn parse_media_range(element: &str) -> Option<(f32, &str)> {
    let mut parts = element.split(';');
    let range = parts.next()?.trim();
    if range.is_empty() {
        return None;
    }
    let mut weight = 1.0f32;
    for param in parts {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("q=") {
            weight = value.trim().parse().unwrap_or(0.0);
        }
    }
    Some((weight, range))
}

/// Returns whether a media range (possibly wildcarded) covers a media type.
fn media_range_matches(range: &str, mime: &str) -> bool {
    if range == "*/*" {
        return true;
    }
    if let Some(main) = range.strip_suffix("/*") {
        return mime
            .split('/')
            .next()
            .is_some_and(|mime_main| mime_main.eq_ignore_ascii_case(main));
    }
    range.eq_ignore_ascii_case(mime)
}
