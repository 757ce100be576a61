//! Shared utility functions.

mod url;

pub use url::normalize_item_url;
