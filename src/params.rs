//! Build-parameter substitution and module-list normalization.
//!
//! Module lists are whitespace/newline-separated; `\ ` escapes a space so
//! that module names containing spaces survive splitting. Parameter
//! substitution expands `${name}` placeholders from the build's variables.

use std::collections::HashMap;

/// Expand `${name}` placeholders in `text` from `params`.
///
/// Single pass, non-recursive: substituted values are not re-scanned for
/// further placeholders. Placeholders whose name is not present in `params`
/// are left verbatim. There is no escape syntax for a literal `${...}`.
#[must_use]
pub fn populate(text: &str, params: &HashMap<String, String>) -> String {
    if params.is_empty() || text.is_empty() {
        return text.to_owned();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                if let Some(value) = params.get(key) {
                    out.push_str(&rest[..start]);
                    out.push_str(value);
                    rest = &after[close + 1..];
                } else {
                    // Unknown placeholder: emit the opener and keep scanning
                    // after it, so a known `${x}` nested further in still
                    // resolves.
                    out.push_str(&rest[..start + 2]);
                    rest = after;
                }
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Split a module list on runs of space/CR/LF that are not opened by an
/// escaped space, then unescape `\ ` to a plain space in each token.
///
/// An empty or all-whitespace input yields zero modules.
#[must_use]
pub fn normalize_modules(modules: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut token = String::new();
    let mut prev: Option<char> = None;
    let mut chars = modules.chars().peekable();
    while let Some(c) = chars.next() {
        if matches!(c, ' ' | '\r' | '\n') && prev != Some('\\') {
            // Separator run; the escape check only applies to its first
            // character.
            while matches!(chars.peek(), Some(&(' ' | '\r' | '\n'))) {
                chars.next();
            }
            if !token.is_empty() {
                out.push(unescape(&token));
                token.clear();
            }
            prev = None;
            continue;
        }
        token.push(c);
        prev = Some(c);
    }
    if !token.is_empty() {
        out.push(unescape(&token));
    }
    out
}

fn unescape(token: &str) -> String {
    token.replace("\\ ", " ")
}
