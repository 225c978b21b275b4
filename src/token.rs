//! Token-substitution micro-language.
//!
//! Request fields may reference a slice of a named message source
//! ("body", "from", "to") with a placeholder expression:
//!
//! ```text
//! $(body)                  whole source
//! $(body){25}              from index 25
//! $(body){25,16}           from index 25, 16 bytes
//! $(body){[needle]}        from first occurrence of "needle"
//! $(body){[needle]+4,9}    from occurrence + 4, 9 bytes
//! $(body){[a]+1,[b]-2}     from occurrence of "a" + 1 to occurrence of "b" - 2
//! ```
//!
//! Token names and substring searches are case-insensitive. Only the first
//! recognized expression per input string is replaced. An expression whose
//! computed range falls outside the source (or whose needle is absent) is
//! left unresolved: the literal text stays in place and the malformed
//! request surfaces as a transport error downstream.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::message::InboundMessage;

/// Compiled placeholder grammar for one token name.
pub struct TokenRewriter {
    token_only: Regex,
    start_index: Regex,
    needle_to_needle: Regex,
    needle_with_length: Regex,
}

impl TokenRewriter {
    /// Compile the grammar for a token name such as `body`.
    ///
    /// Panics on an invalid name pattern, so construction belongs in
    /// statics/tests rather than per-message code paths.
    pub fn new(name: &str) -> Self {
        let name = regex::escape(name);
        let token = format!(r"(?i)\$\({name}\)");
        Self {
            token_only: Regex::new(&token).unwrap(),
            start_index: Regex::new(&format!(r"{token}\{{(\d+)(?:,(\d+))?\}}")).unwrap(),
            needle_to_needle: Regex::new(&format!(
                r"{token}\{{\[(.*?)\]([+-]\d+)?,\[(.*?)\]([+-]\d+)?\}}"
            ))
            .unwrap(),
            needle_with_length: Regex::new(&format!(
                r"{token}\{{\[(.*?)\]([+-]\d+)?(?:,(\d+))?\}}"
            ))
            .unwrap(),
        }
    }

    /// Rewrite the first recognized expression in `input` against `source`.
    ///
    /// Returns the input unchanged when no expression is present or when
    /// the expression cannot be resolved.
    pub fn rewrite(&self, input: &str, source: &str) -> String {
        // Most specific form first: explicit start index.
        if let Some(caps) = self.start_index.captures(input) {
            let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
            let Ok(start) = caps[1].parse::<usize>() else {
                return input.to_string();
            };
            let end = match caps.get(2) {
                Some(len) => match len.as_str().parse::<usize>() {
                    Ok(len) => start.saturating_add(len),
                    Err(_) => return input.to_string(),
                },
                None => source.len(),
            };
            return match slice(source, start, end) {
                Some(replacement) => splice(input, range, replacement),
                None => input.to_string(),
            };
        }

        // Needle-to-needle must be tried before needle-with-optional-length;
        // the latter's grammar would also match it and misread the needle.
        if let Some(caps) = self.needle_to_needle.captures(input) {
            let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
            let start = resolve_needle(source, &caps[1], caps.get(2).map(|m| m.as_str()));
            let end = resolve_needle(source, &caps[3], caps.get(4).map(|m| m.as_str()));
            return match (start, end) {
                (Some(start), Some(end)) => match slice(source, start, end) {
                    Some(replacement) => splice(input, range, replacement),
                    None => input.to_string(),
                },
                _ => input.to_string(),
            };
        }

        if let Some(caps) = self.needle_with_length.captures(input) {
            let range = caps.get(0).map(|m| m.range()).unwrap_or_default();
            let Some(start) = resolve_needle(source, &caps[1], caps.get(2).map(|m| m.as_str()))
            else {
                return input.to_string();
            };
            let end = match caps.get(3) {
                Some(len) => match len.as_str().parse::<usize>() {
                    Ok(len) => start.saturating_add(len),
                    Err(_) => return input.to_string(),
                },
                None => source.len(),
            };
            return match slice(source, start, end) {
                Some(replacement) => splice(input, range, replacement),
                None => input.to_string(),
            };
        }

        if let Some(m) = self.token_only.find(input) {
            return splice(input, m.range(), source);
        }

        input.to_string()
    }
}

/// Locate a needle (case-insensitive) and apply its signed offset.
/// `None` when the needle is absent or the offset leaves the source.
fn resolve_needle(source: &str, needle: &str, offset: Option<&str>) -> Option<usize> {
    let index = find_ignore_case(source, needle)? as i64;
    let offset: i64 = match offset {
        Some(text) => text.parse().ok()?,
        None => 0,
    };
    let position = index.checked_add(offset)?;
    if position < 0 || position as usize > source.len() {
        return None;
    }
    Some(position as usize)
}

/// Case-insensitive substring search, folding per character so needles
/// differing only in non-ASCII case (`É` vs `é`) still match.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.char_indices().map(|(i, _)| i).find(|&i| {
        let mut rest = haystack[i..].chars();
        needle.chars().all(|n| match rest.next() {
            Some(h) => h.to_lowercase().eq(n.to_lowercase()),
            None => false,
        })
    })
}

/// Checked slice: `None` unless `start <= end <= len` and both indices sit
/// on character boundaries.
fn slice(source: &str, start: usize, end: usize) -> Option<&str> {
    if start > end || end > source.len() {
        return None;
    }
    if !source.is_char_boundary(start) || !source.is_char_boundary(end) {
        return None;
    }
    Some(&source[start..end])
}

/// Replace `range` of `input` with `replacement`.
fn splice(input: &str, range: Range<usize>, replacement: &str) -> String {
    let mut out = String::with_capacity(input.len() + replacement.len());
    out.push_str(&input[..range.start]);
    out.push_str(replacement);
    out.push_str(&input[range.end..]);
    out
}

static BODY: LazyLock<TokenRewriter> = LazyLock::new(|| TokenRewriter::new("body"));
static FROM: LazyLock<TokenRewriter> = LazyLock::new(|| TokenRewriter::new("from"));
static TO: LazyLock<TokenRewriter> = LazyLock::new(|| TokenRewriter::new("to"));

/// Rewrite one request field against every message source it may
/// reference: body, then from, then to.
pub fn replace_message_tokens(input: &str, message: &dyn InboundMessage) -> String {
    let mut out = match message.body_as_string() {
        Some(body) => BODY.rewrite(input, body),
        None => input.to_string(),
    };
    if let Some(from) = message.first_from_address() {
        out = FROM.rewrite(&out, from);
    }
    if let Some(to) = message.first_to_address() {
        out = TO.rewrite(&out, to);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StaticMessage;

    fn body() -> TokenRewriter {
        TokenRewriter::new("body")
    }

    #[test]
    fn whole_source_substitution() {
        let out = body().rewrite("http://$(body)/path", "token-domain.com");
        assert_eq!(out, "http://token-domain.com/path");
    }

    #[test]
    fn token_name_is_case_insensitive() {
        let out = body().rewrite("http://$(BODY)/path", "token-domain.com");
        assert_eq!(out, "http://token-domain.com/path");
    }

    #[test]
    fn start_index_without_length() {
        let source = "Go see something cool at token-domain.com";
        let out = body().rewrite("http://$(body){25}/path", source);
        assert_eq!(out, "http://token-domain.com/path");
    }

    #[test]
    fn start_index_with_length() {
        let source = "Go see something cool at token-domain.com";
        let out = body().rewrite("http://$(BODY){25,16}/path", source);
        assert_eq!(out, "http://token-domain.com/path");
    }

    #[test]
    fn needle_with_length() {
        let source = "A message containing bodyValue at some point";
        let out = body().rewrite("p=$(BODY){[body],9}", source);
        assert_eq!(out, "p=bodyValue");
    }

    #[test]
    fn needle_with_offset() {
        let source = "sender@somewhere.com";
        let out = body().rewrite("http://$(body){[der]+4}/path", source);
        assert_eq!(out, "http://somewhere.com/path");
    }

    #[test]
    fn needle_search_is_case_insensitive() {
        let source = "A message containing BodyValue at some point";
        let out = body().rewrite("p=$(body){[BODY],9}", source);
        assert_eq!(out, "p=BodyValue");
    }

    #[test]
    fn needle_search_folds_non_ascii_case() {
        let out = body().rewrite("p=$(body){[ÉTÉ]}", "un été chaud");
        assert_eq!(out, "p=été chaud");
    }

    #[test]
    fn needle_to_needle() {
        let source = "sender@somewhere.com.uk.zz";
        let out = body().rewrite("http://$(body){[some],[zz]-4}/path", source);
        assert_eq!(out, "http://somewhere.com/path");
    }

    #[test]
    fn needle_to_needle_with_offsets() {
        let source = "sender@somewhere.com.uk.zz";
        let out = body().rewrite("http://$(body){[der]+4,[zz]-4}/path", source);
        assert_eq!(out, "http://somewhere.com/path");
    }

    #[test]
    fn out_of_range_start_is_left_unresolved() {
        let source = "At token-domain.com, you can find cool stuff!";
        let input = "http://$(body){100,2}/path";
        assert_eq!(body().rewrite(input, source), input);
    }

    #[test]
    fn out_of_range_length_is_left_unresolved() {
        let source = "At token-domain.com, you can find cool stuff!";
        let input = "http://$(body){3,100}/path";
        assert_eq!(body().rewrite(input, source), input);
    }

    #[test]
    fn missing_needle_is_left_unresolved() {
        let input = "p=$(body){[absent],4}";
        assert_eq!(body().rewrite(input, "some content"), input);
    }

    #[test]
    fn negative_offset_past_start_is_left_unresolved() {
        let input = "p=$(body){[some]-10,4}";
        assert_eq!(body().rewrite(input, "some content"), input);
    }

    #[test]
    fn end_before_start_is_left_unresolved() {
        let input = "p=$(body){[content],[some]}";
        assert_eq!(body().rewrite(input, "some content"), input);
    }

    #[test]
    fn only_first_match_is_replaced() {
        let out = body().rewrite("$(body) and $(body)", "x");
        assert_eq!(out, "x and $(body)");
    }

    #[test]
    fn no_token_leaves_input_untouched() {
        assert_eq!(body().rewrite("plain text", "source"), "plain text");
    }

    #[test]
    fn non_boundary_slice_is_left_unresolved() {
        // 'é' is two bytes; index 1 is inside it.
        let input = "p=$(body){1,1}";
        assert_eq!(body().rewrite(input, "été"), input);
    }

    #[test]
    fn message_tokens_cover_from_and_to() {
        let message = StaticMessage::new(
            Some("sender@somewhere.com".to_string()),
            Some("recipient@elsewhere.com".to_string()),
            Some("the body".to_string()),
        );
        assert_eq!(
            replace_message_tokens("http://$(from){7}/path", &message),
            "http://somewhere.com/path"
        );
        assert_eq!(
            replace_message_tokens("http://$(TO){[else]}/path", &message),
            "http://elsewhere.com/path"
        );
        assert_eq!(
            replace_message_tokens("b=$(body)", &message),
            "b=the body"
        );
    }

    #[test]
    fn absent_source_leaves_token_unresolved() {
        let message = StaticMessage::new(Some("a@b.com".to_string()), None, None);
        assert_eq!(replace_message_tokens("b=$(body)", &message), "b=$(body)");
    }
}
