//! HTML escaping: a single routine that short-circuits when no escapable
//! character is present, otherwise applies a one-pass translation table
//! for `&`, `<`, `>`, `"`, `'` (§4.4 point 10).

const ESCAPABLE: [char; 5] = ['&', '<', '>', '"', '\''];

pub fn needs_escape(s: &str) -> bool {
    s.contains(ESCAPABLE)
}

/// Escapes `s`, returning it unchanged (no allocation) when it contains
/// none of `{&,<,>,",'}` (§8 property 4).
pub fn escape(s: &str) -> std::borrow::Cow<'_, str> {
    if !needs_escape(s) {
        return std::borrow::Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    std::borrow::Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescaped_passthrough() {
        assert!(matches!(escape("hello"), std::borrow::Cow::Borrowed(_)));
    }

    #[test]
    fn escapes_all_five() {
        assert_eq!(escape(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;");
    }

    #[test]
    fn double_escape_is_not_idempotent() {
        let once = escape("<b>").into_owned();
        let twice = escape(&once).into_owned();
        assert_ne!(once, twice);
        assert_eq!(twice, "&amp;lt;b&amp;gt;");
    }
}
