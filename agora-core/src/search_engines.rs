//! Web search engine registry
//!
//! Each engine describes how to drive its home page in a browser and where
//! result snippets live in the rendered DOM.

use serde::Serialize;

/// A web search engine driven through a browser
#[derive(Debug, Clone, Serialize)]
pub struct SearchEngine {
    /// Human-readable name
    pub name: &'static str,
    /// Page holding the search box
    pub home_url: &'static str,
    /// CSS selector of the query input
    pub input_selector: &'static str,
    /// CSS selector matching one result block
    pub result_selector: &'static str,
    /// Snippet locators inside a result block, tried in order
    pub snippet_selectors: &'static [&'static str],
}

/// Default list of search engines (the first one is the default)
pub static DEFAULT_SEARCH_ENGINES: &[SearchEngine] = &[
    SearchEngine {
        name: "Baidu",
        home_url: "https://www.baidu.com",
        input_selector: "#kw",
        result_selector: ".c-container",
        snippet_selectors: &[".content-right_8Zs40", ".content-right"],
    },
    SearchEngine {
        name: "Bing",
        home_url: "https://www.bing.com",
        input_selector: "#sb_form_q",
        result_selector: "li.b_algo",
        snippet_selectors: &[".b_caption p", ".b_lineclamp2"],
    },
    SearchEngine {
        name: "DuckDuckGo",
        home_url: "https://duckduckgo.com",
        input_selector: "input[name=q]",
        result_selector: "article[data-testid=result]",
        snippet_selectors: &["[data-result=snippet]", "div[data-result=snippet]"],
    },
];

/// The engine used when none is configured
pub fn default_engine() -> &'static SearchEngine {
    &DEFAULT_SEARCH_ENGINES[0]
}

/// Find an engine by name (case-insensitive)
pub fn find_engine(name: &str) -> Option<&'static SearchEngine> {
    DEFAULT_SEARCH_ENGINES
        .iter()
        .find(|e| e.name.eq_ignore_ascii_case(name.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine() {
        let engine = default_engine();
        assert_eq!(engine.name, "Baidu");
        assert_eq!(engine.input_selector, "#kw");
        assert_eq!(engine.snippet_selectors.len(), 2);
    }

    #[test]
    fn test_find_engine() {
        assert_eq!(find_engine("bing").map(|e| e.name), Some("Bing"));
        assert_eq!(find_engine(" DuckDuckGo ").map(|e| e.name), Some("DuckDuckGo"));
        assert!(find_engine("altavista").is_none());
    }
}
