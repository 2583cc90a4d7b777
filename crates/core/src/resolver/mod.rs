//! Stock asset URL resolution.
//!
//! Maps a pasted asset URL (or a `site:id` shorthand) to the vendor site key
//! and asset id. Resolution is pure and synchronous; a `None` result means the
//! caller has to ask the user for the site and id explicitly.

mod rules;

pub use rules::{rules, ResolverRule};

use serde::{Deserialize, Serialize};

/// A stock asset identified from user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAsset {
    /// Vendor site key (e.g. "shutterstock").
    pub site: String,
    /// Site-specific asset id.
    pub asset_id: String,
    /// The URL the asset was resolved from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Resolve free-form input to a stock site and asset id.
///
/// Rules are evaluated in declared order and the first match wins. The
/// `site:id` shorthand is only considered when no rule matches.
pub fn resolve(input: &str) -> Option<ResolvedAsset> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    for rule in rules() {
        if let Some(asset_id) = rule.extract(input) {
            return Some(ResolvedAsset {
                site: rule.site.to_string(),
                asset_id,
                source_url: Some(input.to_string()),
            });
        }
    }

    parse_shorthand(input)
}

/// Resolve a preview item that may carry an explicit site and id, a URL, or both.
///
/// An explicit, non-empty site+id pair wins over the URL.
pub fn resolve_item(
    url: Option<&str>,
    site: Option<&str>,
    asset_id: Option<&str>,
) -> Option<ResolvedAsset> {
    let site = site.map(str::trim).filter(|s| !s.is_empty());
    let asset_id = asset_id.map(str::trim).filter(|s| !s.is_empty());
    let url = url.map(str::trim).filter(|s| !s.is_empty());

    if let (Some(site), Some(asset_id)) = (site, asset_id) {
        return Some(ResolvedAsset {
            site: site.to_lowercase(),
            asset_id: asset_id.to_string(),
            source_url: url.map(str::to_string),
        });
    }

    url.and_then(resolve)
}

/// Parse the `site:id` shorthand.
fn parse_shorthand(input: &str) -> Option<ResolvedAsset> {
    let (site, asset_id) = input.split_once(':')?;
    let site = site.trim();
    let asset_id = asset_id.trim();

    if site.is_empty() || asset_id.is_empty() {
        return None;
    }
    if !site
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    // Rejects "https://unknown.example/..." which would otherwise split on the scheme.
    if asset_id.contains('/') || asset_id.chars().any(char::is_whitespace) {
        return None;
    }

    Some(ResolvedAsset {
        site: site.to_lowercase(),
        asset_id: asset_id.to_string(),
        source_url: None,
    })
}
