//! CQL tokenizer and canonicalizer.
//!
//! The canonical form of a script is the whitespace- and comment-free,
//! space-separated token sequence. It is what gets stored, executed, and
//! checksummed, so two files that differ only in layout or comments hash to
//! the same digest.

use crate::error::{Error, Result};

/// Token classes, in the priority order the scanner tries them.
///
/// The order matters: strings shield their contents from comment and
/// whitespace rules, comments shield theirs from everything below, and
/// whitespace must be tried before the single-character symbol class so that
/// symbols cannot swallow whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    StringLiteral,
    Comment,
    Uuid,
    Whitespace,
    Symbol,
    Word,
}

/// One lexed token, borrowing its text from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

impl Token<'_> {
    /// Whether this token contributes to the canonical form.
    pub fn is_canonical(&self) -> bool {
        !matches!(self.kind, TokenKind::Comment | TokenKind::Whitespace)
    }
}

/// Lex a CQL script into tokens.
///
/// Scans left to right; at each position the token classes are tried in
/// [`TokenKind`] order and the first match wins. Case is preserved.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        let rest = &input[pos..];
        let (kind, len) = match_token(rest).ok_or(Error::Lex { offset: pos })?;
        tokens.push(Token {
            kind,
            text: &input[pos..pos + len],
        });
        pos += len;
    }
    Ok(tokens)
}

/// Produce the canonical form: all non-comment, non-whitespace token values
/// joined by single ASCII spaces, in scan order.
pub fn canonicalize(input: &str) -> Result<String> {
    let tokens = tokenize(input)?;
    let mut out = String::with_capacity(input.len());
    for token in tokens.iter().filter(|t| t.is_canonical()) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(token.text);
    }
    Ok(out)
}

fn match_token(rest: &str) -> Option<(TokenKind, usize)> {
    if let Some(len) = match_string(rest) {
        return Some((TokenKind::StringLiteral, len));
    }
    if let Some(len) = match_comment(rest) {
        return Some((TokenKind::Comment, len));
    }
    if let Some(len) = match_uuid(rest) {
        return Some((TokenKind::Uuid, len));
    }
    if let Some(len) = match_whitespace(rest) {
        return Some((TokenKind::Whitespace, len));
    }
    if let Some(len) = match_symbol(rest) {
        return Some((TokenKind::Symbol, len));
    }
    if let Some(len) = match_word(rest) {
        return Some((TokenKind::Word, len));
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `'…'` or `"…"`; a doubled delimiter inside the literal is an escape.
/// Anything else, including newlines and comment openers, is literal content.
/// An unterminated literal does not match, so the quote falls through to the
/// symbol class.
fn match_string(rest: &str) -> Option<usize> {
    let mut chars = rest.char_indices();
    let (_, delim) = chars.next()?;
    if delim != '\'' && delim != '"' {
        return None;
    }
    while let Some((idx, c)) = chars.next() {
        if c == delim {
            match rest[idx + c.len_utf8()..].chars().next() {
                Some(next) if next == delim => {
                    chars.next();
                }
                _ => return Some(idx + c.len_utf8()),
            }
        }
    }
    None
}

/// Block comment `/* … */` (non-greedy, may span lines) or a line comment:
/// two or more slashes, or two or more dashes, to end of line.
fn match_comment(rest: &str) -> Option<usize> {
    if let Some(after) = rest.strip_prefix("/*") {
        return after.find("*/").map(|idx| 2 + idx + 2);
    }
    if rest.starts_with("//") || rest.starts_with("--") {
        return Some(match rest.find('\n') {
            Some(idx) => idx,
            None => rest.len(),
        });
    }
    None
}

/// Exact `8-4-4-4-12` hex pattern. Matched before the word class so a UUID
/// literal stays a single token instead of splitting on its dashes.
fn match_uuid(rest: &str) -> Option<usize> {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];
    let bytes = rest.as_bytes();
    let mut pos = 0;
    for (i, group) in GROUPS.iter().enumerate() {
        if i > 0 {
            if bytes.get(pos) != Some(&b'-') {
                return None;
            }
            pos += 1;
        }
        for _ in 0..*group {
            if !bytes.get(pos)?.is_ascii_hexdigit() {
                return None;
            }
            pos += 1;
        }
    }
    Some(pos)
}

fn match_whitespace(rest: &str) -> Option<usize> {
    let len = rest
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(idx, _)| idx)
        .unwrap_or(rest.len());
    (len > 0).then_some(len)
}

/// A single non-word character.
fn match_symbol(rest: &str) -> Option<usize> {
    let c = rest.chars().next()?;
    (!is_word_char(c)).then(|| c.len_utf8())
}

fn match_word(rest: &str) -> Option<usize> {
    let len = rest
        .char_indices()
        .find(|(_, c)| !is_word_char(*c))
        .map(|(idx, _)| idx)
        .unwrap_or(rest.len());
    (len > 0).then_some(len)
}
