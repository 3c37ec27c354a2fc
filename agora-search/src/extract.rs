//! Snippet extraction from a rendered results page
//!
//! Each result block is read with a prioritized strategy: the engine's
//! snippet locators in order, then the whole block's text.

use agora_core::SearchEngine;
use scraper::{ElementRef, Html, Selector};

/// Extract up to `max_results` snippets, separated by blank lines
pub fn extract_snippets(
    html: &str,
    engine: &SearchEngine,
    max_results: usize,
) -> Result<String, String> {
    let result_selector = parse_selector(engine.result_selector)?;
    let snippet_selectors = engine
        .snippet_selectors
        .iter()
        .map(|s| parse_selector(s))
        .collect::<Result<Vec<_>, _>>()?;

    let document = Html::parse_document(html);

    let snippets: Vec<String> = document
        .select(&result_selector)
        .take(max_results)
        .map(|block| block_text(block, &snippet_selectors))
        .filter(|text| !text.is_empty())
        .collect();

    Ok(snippets.join("\n\n"))
}

fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("invalid selector {}: {:?}", selector, e))
}

/// Text of the first matching snippet locator, else of the whole block
fn block_text(block: ElementRef<'_>, snippet_selectors: &[Selector]) -> String {
    snippet_selectors
        .iter()
        .find_map(|selector| block.select(selector).next())
        .map(text_content)
        .unwrap_or_else(|| text_content(block))
}

fn text_content(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Normalize whitespace in text
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::default_engine;

    const RESULTS_PAGE: &str = r#"
        <html><body>
            <div class="c-container">
                <h3>First</h3>
                <div class="content-right_8Zs40">  Primary
                    snippet </div>
                <div class="content-right">secondary ignored</div>
            </div>
            <div class="c-container">
                <h3>Second</h3>
                <div class="content-right">Secondary snippet</div>
            </div>
            <div class="c-container"><span>Whole</span> <span>block</span></div>
            <div class="c-container">   </div>
        </body></html>
    "#;

    #[test]
    fn test_prioritized_extraction() {
        let text = extract_snippets(RESULTS_PAGE, default_engine(), 5).unwrap();
        assert_eq!(text, "Primary snippet\n\nSecondary snippet\n\nWhole block");
    }

    #[test]
    fn test_result_limit() {
        let text = extract_snippets(RESULTS_PAGE, default_engine(), 1).unwrap();
        assert_eq!(text, "Primary snippet");
    }

    #[test]
    fn test_matching_locator_wins_even_when_empty() {
        let page = r#"
            <div class="c-container">
                <div class="content-right_8Zs40"> </div>
                <div class="content-right">not used</div>
            </div>
            <div class="c-container"><div class="content-right">Kept</div></div>
        "#;

        let text = extract_snippets(page, default_engine(), 5).unwrap();
        assert_eq!(text, "Kept");
    }

    #[test]
    fn test_no_results() {
        let text = extract_snippets("<html><body><p>nothing</p></body></html>", default_engine(), 5)
            .unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_normalize_whitespace() {
        let input = "  hello   world  \n\t  test  ";
        let output = normalize_whitespace(input);
        assert_eq!(output, "hello world test");
    }
}
