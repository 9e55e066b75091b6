//! Error translation.
//!
//! Every failure leaving the dispatcher passes through here: the
//! human-readable text is localized using the request's best-match locale,
//! and the failure is rendered as a protocol-correct response. Translation
//! is best-effort; a missing catalog entry leaves the original text intact.

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::Full;

use canopy_core::{Catalog, ContentFormat, ServiceError};

use crate::handler::HttpResponse;

/// A failure with its localized presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedError {
    /// Transport status for the failure.
    pub status: StatusCode,
    /// Localized human-readable message.
    pub message: String,
    /// Localized additional detail, for HTTP-shaped failures that carry one.
    pub detail: Option<String>,
}

/// Localizes a failure's translatable text.
///
/// Domain and transport failures have their message localized; HTTP-shaped
/// failures additionally get their detail localized. Without a locale the
/// original text is used as-is.
///
/// # Example
///
/// ```rust
/// use canopy_core::{Catalog, ServiceError};
/// use canopy_dispatch::translate_error;
///
/// let catalog = Catalog::new()
///     .with_messages("fr", [("cluster not found", "cluster introuvable")]);
/// let err = ServiceError::not_found("cluster not found");
///
/// let translated = translate_error(&err, Some("fr"), &catalog);
/// assert_eq!(translated.message, "cluster introuvable");
/// ```
#[must_use]
pub fn translate_error(
    err: &ServiceError,
    locale: Option<&str>,
    catalog: &Catalog,
) -> TranslatedError {
    let status = err.status_code();

    let Some(locale) = locale else {
        return TranslatedError {
            status,
            message: err.to_string(),
            detail: error_detail(err).map(ToString::to_string),
        };
    };

    match err {
        ServiceError::Http {
            explanation,
            detail,
            ..
        } => TranslatedError {
            status,
            message: catalog.translate(locale, explanation).to_string(),
            detail: detail
                .as_deref()
                .map(|d| catalog.translate(locale, d).to_string()),
        },
        other => {
            let original = other.to_string();
            TranslatedError {
                status,
                message: catalog.translate(locale, &original).to_string(),
                detail: None,
            }
        }
    }
}

fn error_detail(err: &ServiceError) -> Option<&str> {
    match err {
        ServiceError::Http { detail, .. } => detail.as_deref(),
        _ => None,
    }
}

/// Renders a translated failure as a response in the negotiated format.
#[must_use]
pub fn error_response(
    err: &ServiceError,
    translated: &TranslatedError,
    format: ContentFormat,
) -> HttpResponse {
    let mut body = err.error_body_with_message(&translated.message);
    if let Some(detail) = &translated.detail {
        body["error"]["detail"] = serde_json::Value::String(detail.clone());
    }

    let bytes = serde_json::to_vec(&body)
        .unwrap_or_else(|_| translated.message.clone().into_bytes());

    Response::builder()
        .status(translated.status)
        .header(http::header::CONTENT_TYPE, format.mime())
        .body(Full::new(Bytes::from(bytes)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
