//! # Canopy Core
//!
//! Core types for the Canopy request server:
//!
//! - [`RequestContext`] - per-request state
//! - [`Action`] - the closed set of resource actions
//! - [`ServiceError`] - the failure taxonomy absorbed at the dispatcher
//! - [`Catalog`] - locale catalog for error message localization
//! - [`ContentFormat`] - supported body formats

#![doc(html_root_url = "https://docs.rs/canopy-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod action;
mod context;
mod error;
mod format;
pub mod i18n;

pub use action::Action;
pub use context::{RequestContext, RequestId};
pub use error::{ErrorCategory, ServiceError, ServiceResult};
pub use format::ContentFormat;
pub use i18n::Catalog;
