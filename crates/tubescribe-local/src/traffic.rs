//! Sub-resource suppression for the watch page.
//!
//! Images, fonts, media and tracker calls add latency and noise but never carry the
//! transcript exchange, so they are aborted before they are sent. Document and XHR
//! requests are always let through.

use tubescribe_core::{RequestDecision, RequestDescriptor, RequestGate};

/// URL substrings treated as blockable.
pub const DEFAULT_BLOCK_PATTERNS: &[&str] = &[
    "googlevideo.com/videoplayback?expire=",
    // images
    ".jpg",
    ".jpeg",
    ".png",
    ".gif",
    ".webp",
    ".svg",
    ".ico",
    ".ytimg.com/vi",
    "s/gaming/emoji",
    "/yt3.ggpht.com/ytc",
    "data:image",
    // fonts
    ".woff",
    ".woff2",
    ".ttf",
    ".otf",
    ".eot",
    // media
    ".mp4",
    ".mp3",
    ".webm",
    ".avi",
    // ads, trackers, analytics
    "doubleclick.net",
    "google-analytics.com",
    "googlesyndication.com",
    "googleadservices.com",
    "googletagmanager.com",
    "youtube.com/api/stats/",
    "youtube.com/csi",
    "youtube.com/ptracking",
    "sentry.io",
    "newrelic.com",
    "facebook.com",
    "facebook.net",
    "fbcdn.net",
    "twitter.com",
    "pbs.twimg.com",
    "criteo.com",
    "criteo.net",
    "adnxs.com",
    "taboola.com",
    "outbrain.com",
    "contextual.media.net",
    "smartadserver.com",
    "creativecdn.com",
    "asalemedia",
    "ubiconproject",
    "3lift",
    "am-cell",
    "opera",
    "ds.yahoo",
    // static assets and fragments
    "/static/",
    "fragment/fly-out",
    // documents
    ".pdf",
    ".xlsx",
    ".doc",
    ".docx",
    "ytimg.com/log_event",
];

#[derive(Debug, Clone)]
pub struct TrafficPolicy {
    patterns: Vec<String>,
}

impl Default for TrafficPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_PATTERNS.iter().copied())
    }
}

impl TrafficPolicy {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for p in patterns {
            let p = p.into();
            if p.is_empty() || out.contains(&p) {
                continue;
            }
            out.push(p);
        }
        Self { patterns: out }
    }

    /// Built-in patterns plus caller-supplied extras.
    pub fn with_extra(extra: &[String]) -> Self {
        Self::new(
            DEFAULT_BLOCK_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .chain(extra.iter().map(|s| s.trim().to_string())),
        )
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_blockable(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| url.contains(p.as_str()))
    }

    pub fn decide(&self, req: &RequestDescriptor) -> RequestDecision {
        // Essential traffic wins over any pattern match.
        if req.resource_type.is_essential() {
            return RequestDecision::Allow;
        }
        if self.is_blockable(&req.url) {
            RequestDecision::Abort
        } else {
            RequestDecision::Allow
        }
    }
}

impl RequestGate for TrafficPolicy {
    fn decide(&self, req: &RequestDescriptor) -> RequestDecision {
        TrafficPolicy::decide(self, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tubescribe_core::ResourceType;

    fn req(url: &str, rt: ResourceType) -> RequestDescriptor {
        RequestDescriptor {
            url: url.to_string(),
            resource_type: rt,
        }
    }

    #[test]
    fn blocks_thumbnails_and_trackers() {
        let p = TrafficPolicy::default();
        assert_eq!(
            p.decide(&req(
                "https://i.ytimg.com/vi/abc/hqdefault.jpg",
                ResourceType::Image
            )),
            RequestDecision::Abort
        );
        assert_eq!(
            p.decide(&req(
                "https://www.youtube.com/api/stats/watchtime?x=1",
                ResourceType::Other("ping".to_string())
            )),
            RequestDecision::Abort
        );
        assert_eq!(
            p.decide(&req(
                "https://www.youtube.com/s/player/base.js",
                ResourceType::Script
            )),
            RequestDecision::Allow
        );
    }

    #[test]
    fn transcript_endpoint_is_never_blocked() {
        let p = TrafficPolicy::default();
        let u = "https://www.youtube.com/youtubei/v1/get_transcript?prettyPrint=false";
        assert_eq!(p.decide(&req(u, ResourceType::Xhr)), RequestDecision::Allow);
        assert_eq!(p.decide(&req(u, ResourceType::Fetch)), RequestDecision::Allow);
    }

    #[test]
    fn extra_patterns_are_appended_and_deduplicated() {
        let p = TrafficPolicy::with_extra(&[" ads.example ".to_string(), ".png".to_string()]);
        assert_eq!(p.patterns().len(), DEFAULT_BLOCK_PATTERNS.len() + 1);
        assert!(p.is_blockable("https://ads.example/x.js"));
    }

    proptest! {
        #[test]
        fn essential_types_are_always_allowed(
            url in ".*",
            xhr in any::<bool>(),
        ) {
            let p = TrafficPolicy::default();
            let rt = if xhr { ResourceType::Xhr } else { ResourceType::Document };
            // Even when the URL is stuffed with blockable patterns.
            let u = format!("{url}.png/static/doubleclick.net");
            prop_assert_eq!(p.decide(&req(&u, rt)), RequestDecision::Allow);
        }

        #[test]
        fn blockable_non_essential_is_always_aborted(
            prefix in "[a-z0-9:/._-]{0,40}",
            suffix in "[a-z0-9/?=&._-]{0,40}",
            idx in 0usize..DEFAULT_BLOCK_PATTERNS.len(),
            rt in prop_oneof![
                Just(ResourceType::Image),
                Just(ResourceType::Font),
                Just(ResourceType::Media),
                Just(ResourceType::Script),
                Just(ResourceType::Stylesheet),
                Just(ResourceType::Fetch),
                Just(ResourceType::Other("ping".to_string())),
            ],
        ) {
            let p = TrafficPolicy::default();
            let u = format!("{prefix}{}{suffix}", DEFAULT_BLOCK_PATTERNS[idx]);
            prop_assert_eq!(p.decide(&req(&u, rt)), RequestDecision::Abort);
        }
    }
}
