//! Ordered URL matching table.
//!
//! Rules are tried top to bottom. Within a site, specific shapes come before
//! looser ones: the loose Shutterstock rule would happily accept a digit run
//! from the slug, so it must stay behind the slug-aware rules.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// One entry of the resolver table.
#[derive(Debug)]
pub struct ResolverRule {
    /// Vendor site key produced on match.
    pub site: &'static str,
    /// Short label of the URL shape this rule covers.
    pub shape: &'static str,
    regex: Regex,
}

impl ResolverRule {
    fn new(site: &'static str, shape: &'static str, domain: &str, path: &str) -> Self {
        let pattern = format!(r"^(?i:(?:https?://)?(?:[a-z0-9-]+\.)*{}){}", domain, path);
        Self {
            site,
            shape,
            regex: Regex::new(&pattern).unwrap(),
        }
    }

    /// Pattern source, for diagnostics.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Extract the asset id if `input` matches this rule.
    pub fn extract(&self, input: &str) -> Option<String> {
        self.regex
            .captures(input)
            .and_then(|caps| caps.name("id"))
            .map(|m| m.as_str().to_string())
            .filter(|id| !id.is_empty())
    }
}

static RULES: Lazy<Vec<ResolverRule>> = Lazy::new(|| {
    vec![
        // Shutterstock
        ResolverRule::new(
            "shutterstock",
            "image with slug",
            r"shutterstock\.com",
            r"/(?:[a-z]{2}/)?(?:image-photo|image-vector|image-illustration|image-generated)/(?:[^/?#]*-)?(?P<id>\d+)(?:[/?#]|$)",
        ),
        ResolverRule::new(
            "shutterstock",
            "legacy pic",
            r"shutterstock\.com",
            r"/(?:[a-z]{2}/)?pic-(?P<id>\d+)",
        ),
        ResolverRule::new(
            "shutterstock",
            "video clip",
            r"shutterstock\.com",
            r"/(?:[a-z]{2}/)?video/clip-(?P<id>\d+)",
        ),
        ResolverRule::new(
            "shutterstock",
            "music track",
            r"shutterstock\.com",
            r"/(?:[a-z]{2}/)?music/track-(?P<id>\d+)",
        ),
        ResolverRule::new(
            "shutterstock",
            "loose",
            r"shutterstock\.com",
            r"/[^?#]*?(?P<id>\d+)(?:[/?#.]|$)",
        ),
        // Adobe Stock
        ResolverRule::new(
            "adobestock",
            "asset_id query",
            r"stock\.adobe\.com",
            r"/[^#]*?[?&]asset_id=(?P<id>\d+)",
        ),
        ResolverRule::new(
            "adobestock",
            "images/templates/3d/audio/video",
            r"stock\.adobe\.com",
            r"/(?:[a-z]{2}(?:_[a-z]{2})?/)?(?:images|templates|3d-assets|audio|video|stock-photo)/(?:[^/?#]+/)?(?P<id>\d+)(?:[/?#]|$)",
        ),
        // Depositphotos
        ResolverRule::new(
            "depositphotos",
            "photo/vector/video with slug",
            r"depositphotos\.com",
            r"/(?:[a-z]{2}/)?(?:photo|vector|video|editorial)/(?:[^/?#]*-)?(?P<id>\d+)\.html",
        ),
        ResolverRule::new(
            "depositphotos",
            "legacy id-first",
            r"depositphotos\.com",
            r"/(?:[a-z]{2}/)?(?P<id>\d+)/(?:stock|free|editorial)-",
        ),
        // 123RF
        ResolverRule::new(
            "123rf",
            "typed item",
            r"123rf\.com",
            r"/(?:[a-z]{2}/)?(?:photo|vector|footage|audio|clipart-vector)_(?P<id>\d+)",
        ),
        // iStock
        ResolverRule::new(
            "istockphoto",
            "typed item with gm id",
            r"istockphoto\.com",
            r"/(?:[a-z]{2}/)?(?:photo|vector|video|illustration)/[^?#]*-gm(?P<id>\d+)(?:[-/?#]|$)",
        ),
        ResolverRule::new(
            "istockphoto",
            "loose gm id",
            r"istockphoto\.com",
            r"/[^?#]*?gm(?P<id>\d{5,})",
        ),
        // Getty Images
        ResolverRule::new(
            "gettyimages",
            "typed detail",
            r"gettyimages\.[a-z.]+",
            r"/(?:[a-z]{2}/)?detail/(?:photo|illustration|video|news-photo|vector)/[^/?#]+/(?P<id>\d+)",
        ),
        ResolverRule::new(
            "gettyimages",
            "bare detail",
            r"gettyimages\.[a-z.]+",
            r"/(?:[a-z]{2}/)?detail/(?P<id>\d+)",
        ),
        // Freepik
        ResolverRule::new(
            "freepik",
            "video",
            r"freepik\.com",
            r"/(?:[a-z]{2}/)?(?:free|premium)-video/[^/?#]+_(?P<id>\d+)",
        ),
        ResolverRule::new(
            "freepik",
            "image",
            r"freepik\.com",
            r"/(?:[a-z]{2}/)?(?:free|premium)-(?:photo|vector|psd|ai-image|icon)/[^/?#]+_(?P<id>\d+)\.htm",
        ),
        // Flaticon
        ResolverRule::new(
            "flaticon",
            "icon/sticker",
            r"flaticon\.com",
            r"/(?:[a-z]{2}/)?(?:free|premium)-(?:icon|sticker|animated-icon)/[^/?#]+_(?P<id>\d+)",
        ),
        // Vecteezy
        ResolverRule::new(
            "vecteezy",
            "typed item",
            r"vecteezy\.com",
            r"/(?:[a-z]{2}/)?(?:vector-art|photo|video|png|free-vector|free-photos|free-videos)/(?P<id>\d+)-",
        ),
        // Envato Elements
        ResolverRule::new(
            "envato",
            "slug with item code",
            r"elements\.envato\.com",
            r"/(?:[a-z]{2}/)?(?:[a-z0-9-]+/)*[a-z0-9-]+-(?P<id>[A-Z0-9]{6,})(?:[/?#]|$)",
        ),
        // Dreamstime
        ResolverRule::new(
            "dreamstime",
            "slug with typed id",
            r"dreamstime\.com",
            r"/[^?#]*?-(?:image|stock-photo|illustration|stock-video)(?P<id>\d+)",
        ),
        // Alamy
        ResolverRule::new(
            "alamy",
            "slug with image id",
            r"alamy\.com",
            r"/[^?#]*?-image(?P<id>\d+)\.html",
        ),
        // Pond5
        ResolverRule::new(
            "pond5",
            "item",
            r"pond5\.com",
            r"/[^/?#]+/item/(?P<id>\d+)",
        ),
        // Rawpixel
        ResolverRule::new(
            "rawpixel",
            "image",
            r"rawpixel\.com",
            r"/image/(?P<id>\d+)",
        ),
    ]
});

/// The resolver table in evaluation order.
pub fn rules() -> &'static [ResolverRule] {
    &RULES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_rules_compile_with_id_group() {
        for rule in rules() {
            assert!(
                rule.pattern().contains("(?P<id>"),
                "rule {} / {} has no id group",
                rule.site,
                rule.shape
            );
        }
    }

    #[test]
    fn test_specific_shutterstock_rules_precede_loose_rule() {
        let positions: Vec<(usize, &str)> = rules()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.site == "shutterstock")
            .map(|(i, r)| (i, r.shape))
            .collect();

        let loose = positions.iter().find(|(_, s)| *s == "loose").unwrap().0;
        assert!(positions.iter().all(|(i, s)| *s == "loose" || *i < loose));
    }

    #[test]
    fn test_rules_are_grouped_by_site() {
        let mut seen: Vec<&str> = Vec::new();
        for rule in rules() {
            if seen.last() != Some(&rule.site) {
                assert!(
                    !seen.contains(&rule.site),
                    "site {} rules are not contiguous",
                    rule.site
                );
                seen.push(rule.site);
            }
        }
    }

    #[test]
    fn test_extract_returns_none_on_miss() {
        let rule = &rules()[0];
        assert!(rule.extract("https://example.com/").is_none());
    }
}
