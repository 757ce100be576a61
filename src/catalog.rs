//! Catalog registry.
//!
//! One pipeline serves every catalog; what differs per site lives here as
//! data: where the sitemap is, how to tell sub-sitemaps from item pages,
//! how URLs canonicalize, which table rows land in, and how to read the
//! run count off a page.

use std::sync::Arc;

use crate::extract::{MetricExtractor, SelectorMetricExtractor};

/// Everything the pipeline needs to know about one catalog.
#[derive(Clone)]
pub struct Catalog {
    /// Short identifier used on the command line.
    pub id: String,

    pub name: String,

    /// Root sitemap to start discovery from.
    pub root_sitemap: String,

    /// Base prefix item URLs collapse under (two path segments after it
    /// identify one logical item). `None` leaves URLs as-is beyond query
    /// stripping.
    pub base_prefix: Option<String>,

    /// URL prefix used for archive (CDX) fallback queries.
    pub archive_prefix: String,

    /// Destination table for this catalog's rows.
    pub table: String,

    /// Decides whether a sitemap `<loc>` entry is itself a sub-sitemap to
    /// recurse into.
    pub is_sub_sitemap: fn(&str) -> bool,

    /// Derives a category tag from a sub-sitemap URL, for catalogs that
    /// encode item type in the sitemap path.
    pub category_for: fn(&str) -> Option<String>,

    /// Reads the popularity metric off an item page.
    pub extractor: Arc<dyn MetricExtractor>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("id", &self.id)
            .field("root_sitemap", &self.root_sitemap)
            .field("table", &self.table)
            .finish()
    }
}

fn xml_sitemap(url: &str) -> bool {
    url.ends_with(".xml") && url.contains("sitemap")
}

fn no_category(_url: &str) -> Option<String> {
    None
}

/// Category from a `sitemap-<name>.xml` path segment. Single-letter
/// segments are pagination shards, not categories.
fn sitemap_segment_category(url: &str) -> Option<String> {
    let name = url
        .rsplit('/')
        .next()?
        .strip_prefix("sitemap-")?
        .strip_suffix(".xml")?;
    if name.len() > 1 {
        Some(name.to_string())
    } else {
        None
    }
}

/// The built-in production catalogs.
pub fn builtin() -> Vec<Catalog> {
    vec![
        Catalog {
            id: "hf-spaces".to_string(),
            name: "Hugging Face Spaces".to_string(),
            root_sitemap: "https://huggingface.co/sitemap.xml".to_string(),
            base_prefix: Some("https://huggingface.co/spaces/".to_string()),
            archive_prefix: "huggingface.co/spaces/".to_string(),
            table: "huggingface_spaces_data".to_string(),
            is_sub_sitemap: xml_sitemap,
            category_for: no_category,
            // Run counter button in the space header.
            extractor: Arc::new(SelectorMetricExtractor::new(
                "button[class*=\"border-l\"][class*=\"items-center\"]",
            )),
        },
        Catalog {
            id: "civitai".to_string(),
            name: "Civitai".to_string(),
            root_sitemap: "https://civitai.com/sitemap.xml".to_string(),
            base_prefix: None,
            archive_prefix: "civitai.com/models/".to_string(),
            table: "civitai_model_data".to_string(),
            is_sub_sitemap: xml_sitemap,
            category_for: sitemap_segment_category,
            // Second row of the stats table holds the download count.
            extractor: Arc::new(SelectorMetricExtractor::new("tr.mantine-1avyp1d").nth(1)),
        },
        Catalog {
            id: "aimodels".to_string(),
            name: "AIModels.fyi".to_string(),
            root_sitemap: "https://www.aimodels.fyi/sitemap.xml".to_string(),
            base_prefix: None,
            archive_prefix: "aimodels.fyi/models/".to_string(),
            table: "aimodelsfyi_model_data".to_string(),
            is_sub_sitemap: xml_sitemap,
            category_for: no_category,
            extractor: Arc::new(SelectorMetricExtractor::new("div.css-19dcitr")),
        },
    ]
}

/// Look up a built-in catalog by id.
pub fn find(id: &str) -> Option<Catalog> {
    builtin().into_iter().find(|c| c.id == id)
}
