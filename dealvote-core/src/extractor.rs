use regex::Regex;

// Markdown link delimiters and whitespace end a URL; percent-encoded octets
// are kept whole.
const URL_PATTERN: &str = r"https?://(?:[\w\-.~:/?#@!$&'*+,;=]|%[0-9A-Fa-f]{2})+";
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\''];

/// Picks the deal link out of a post body.
#[derive(Debug, Clone)]
pub struct UrlExtractor {
    pattern: Regex,
    filters: Vec<String>,
}

impl UrlExtractor {
    pub fn new(filters: Vec<String>) -> Self {
        Self {
            pattern: Regex::new(URL_PATTERN).expect("valid url regex"),
            filters,
        }
    }

    pub fn urls<'a>(&self, body: &'a str) -> Vec<&'a str> {
        self.pattern
            .find_iter(body)
            .map(|m| m.as_str().trim_end_matches(TRAILING_PUNCTUATION))
            .collect()
    }

    /// Returns the first URL containing the first filter that matches any
    /// URL, so filter order decides between several qualifying links.
    /// Empty when nothing qualifies.
    pub fn extract(&self, body: &str) -> String {
        let urls = self.urls(body);
        self.filters
            .iter()
            .find_map(|filter| urls.iter().find(|url| url.contains(filter.as_str())))
            .map(|url| url.to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(filters: &[&str]) -> UrlExtractor {
        UrlExtractor::new(filters.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_filter_match_wins_over_text_order() {
        let e = extractor(&["amazon.com"]);
        let body = "Also at https://ebay.com/y but cheaper at https://amazon.com/x";
        assert_eq!(e.extract(body), "https://amazon.com/x");
    }

    #[test]
    fn test_filter_order_decides_between_candidates() {
        let e = extractor(&["steampowered.com", "gog.com"]);
        let body = "https://www.gog.com/game/a and https://store.steampowered.com/app/1";
        assert_eq!(e.extract(body), "https://store.steampowered.com/app/1");
    }

    #[test]
    fn test_no_match_is_empty() {
        let e = extractor(&["amazon.com"]);
        assert_eq!(e.extract("see https://ebay.com/y"), "");
        assert_eq!(e.extract("no links at all"), "");
    }

    #[test]
    fn test_markdown_links_and_punctuation() {
        let e = extractor(&["example.com"]);
        let body = "[the deal](https://example.com/deal?id=5%20off). Enjoy!";
        assert_eq!(e.extract(body), "https://example.com/deal?id=5%20off");
        assert_eq!(e.urls("Go to http://example.com."), vec!["http://example.com"]);
    }
}
