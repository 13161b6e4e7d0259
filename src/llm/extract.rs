//! Pull Python source out of free-form model output.
//!
//! Models wrap code in fences and prose despite being told not to. Both
//! extractors strip fence markers and then run a two-state line scanner: lines
//! are discarded while seeking an entry construct, and every line after the
//! first entry is kept.

use std::sync::LazyLock;

use regex::Regex;

static FENCE: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"```[A-Za-z0-9_+-]*\n?") {
    Ok(regex) => regex,
    Err(err) => panic!("Fence regex is invalid: {err}"),
});

const CODE_CONSTRUCTS: [&str; 4] = ["def ", "import ", "from ", "class "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Seeking,
    InBlock,
}

fn strip_fences(text: &str) -> String {
    FENCE.replace_all(text, "").into_owned()
}

fn scan<F>(text: &str, is_entry: F) -> String
where
    F: Fn(&str, &str) -> bool,
{
    let mut state = ScanState::Seeking;
    let mut kept = Vec::new();

    for line in text.lines() {
        if state == ScanState::Seeking && is_entry(line, line.trim()) {
            state = ScanState::InBlock;
        }
        if state == ScanState::InBlock {
            kept.push(line);
        }
    }

    kept.join("\n").trim().to_string()
}

fn is_code_entry(_line: &str, stripped: &str) -> bool {
    stripped.starts_with("def ")
        || stripped.starts_with("import ")
        || stripped.starts_with("from ")
        || (stripped.starts_with("class ") && stripped.contains(':'))
}

fn is_test_entry(line: &str, stripped: &str) -> bool {
    stripped.starts_with("import ")
        || stripped.starts_with("from ")
        || stripped.starts_with("class Test")
        || stripped.starts_with("class test")
        || line.starts_with("    def test_")
}

/// Drop anything before the first recognized construct.
fn trim_leading_prose(code: &str) -> &str {
    CODE_CONSTRUCTS
        .iter()
        .filter_map(|construct| code.find(construct))
        .min()
        .map_or(code, |start| &code[start..])
}

/// Extract implementation code from a model response.
pub fn extract_code(response: &str) -> String {
    let unfenced = strip_fences(response);
    let scanned = scan(&unfenced, is_code_entry);
    trim_leading_prose(&scanned).to_string()
}

/// Extract test code from a model response.
pub fn extract_test_code(response: &str) -> String {
    let unfenced = strip_fences(response);
    scan(&unfenced, is_test_entry)
}
