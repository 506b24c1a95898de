//! Wildcard and regex pattern compilation.

use regex::{Regex, RegexBuilder};

/// Returns true if `text` contains glob metacharacters.
#[must_use]
pub fn is_wildcard(text: &str) -> bool {
    text.contains(['*', '?'])
}

/// Translates a glob (`*` any run, `?` one char) to an anchored regex source.
#[must_use]
pub fn wildcard_to_regex(glob: &str) -> String {
    let mut source = String::with_capacity(glob.len() + 8);
    source.push('^');
    let mut literal = String::new();
    for c in glob.chars() {
        match c {
            '*' | '?' => {
                source.push_str(&regex::escape(&literal));
                literal.clear();
                source.push_str(if c == '*' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');
    source
}

/// Compiles `source` with the requested case sensitivity.
pub fn compile(source: &str, case_sensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .case_insensitive(!case_sensitive)
        .size_limit(1 << 20)
        .build()
}
