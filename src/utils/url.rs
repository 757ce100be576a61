//! URL canonicalization.

use url::Url;

/// Canonicalize an item URL for dedup and persistence.
///
/// Strips the query string and fragment. When `base_prefix` is set and the
/// URL falls under it, the path is collapsed to exactly two segments after
/// the prefix, since catalogs nest variant paths (discussions, file trees)
/// under one logical item. URLs under the prefix with fewer than two
/// segments identify no item and are dropped.
///
/// Canonicalization is idempotent: normalizing an already-normal URL is a
/// no-op.
pub fn normalize_item_url(raw: &str, base_prefix: Option<&str>) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    let stripped = url.to_string();

    let Some(prefix) = base_prefix else {
        return Some(stripped);
    };

    if let Some(rest) = stripped.strip_prefix(prefix) {
        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let owner = segments.next()?;
        let name = segments.next()?;
        Some(format!("{}{}/{}", prefix, owner, name))
    } else {
        Some(stripped)
    }
}
