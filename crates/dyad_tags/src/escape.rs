/// Full-width look-alike used in place of `<` where raw text must not open a tag.
pub const LOOKALIKE_LT: char = '＜';
/// Full-width look-alike used in place of `>` inside attribute values.
pub const LOOKALIKE_GT: char = '＞';

const OPEN_PREFIX: &str = "<dyad-";

/// Neutralizes `<dyad` and `</dyad` sequences in payload text so tool output
/// cannot forge control tags.
#[must_use]
pub fn escape_dyad_tags(text: &str) -> String {
    text.replace("</dyad", "＜/dyad").replace("<dyad", "＜dyad")
}

#[must_use]
pub fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Reverses [`escape_attr`] and the look-alike substitution performed by
/// [`normalize_response`].
#[must_use]
pub fn unescape_attr(value: &str) -> String {
    value
        .replace(LOOKALIKE_LT, "<")
        .replace(LOOKALIKE_GT, ">")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Replaces `<` and `>` inside quoted attribute values of `dyad-*` opening
/// tags with their look-alikes.
///
/// The transform is idempotent and prefix-stable: normalizing a streamed
/// prefix yields a prefix of the normalized full text, so snapshots never
/// shrink or rewrite already-broadcast characters.
#[must_use]
pub fn normalize_response(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN_PREFIX) {
        out.push_str(&rest[..start]);
        let tag = &rest[start..];
        let mut in_quote = false;
        let mut consumed = tag.len();

        for (index, ch) in tag.char_indices() {
            match ch {
                '"' => {
                    in_quote = !in_quote;
                    out.push(ch);
                }
                '<' if in_quote => out.push(LOOKALIKE_LT),
                '>' if in_quote => out.push(LOOKALIKE_GT),
                '>' => {
                    out.push(ch);
                    consumed = index + ch.len_utf8();
                    break;
                }
                _ => out.push(ch),
            }
        }

        rest = &tag[consumed..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn payload_escape_neutralizes_open_and_close_tags() {
        let escaped = escape_dyad_tags("<dyad-write path=\"x\">y</dyad-write>");
        assert_eq!(escaped, "＜dyad-write path=\"x\">y＜/dyad-write>");
        assert!(!escaped.contains("<dyad"));
    }

    #[test]
    fn normalize_replaces_brackets_inside_quoted_attributes() {
        let raw = "hi <dyad-write path=\"a.tsx\" description=\"Use <Button> here\">\n<div/>\n</dyad-write>";
        let normalized = normalize_response(raw);
        assert_eq!(
            normalized,
            "hi <dyad-write path=\"a.tsx\" description=\"Use ＜Button＞ here\">\n<div/>\n</dyad-write>"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = "<dyad-output type=\"warning\" message=\"a > b\"></dyad-output>";
        let once = normalize_response(raw);
        assert_eq!(normalize_response(&once), once);
    }

    #[test]
    fn normalize_is_prefix_stable_while_streaming() {
        let raw = "x <dyad-rename from=\"<a>\" to=\"b\"></dyad-rename> <dyad-delete path=\"c>d\">";
        let full = normalize_response(raw);
        for end in (0..=raw.len()).filter(|end| raw.is_char_boundary(*end)) {
            let partial = normalize_response(&raw[..end]);
            assert!(full.starts_with(&partial), "prefix {end} diverged: {partial}");
        }
    }

    #[test]
    fn attr_escape_round_trips() {
        let value = "a < b & \"c\" > d";
        assert_eq!(unescape_attr(&escape_attr(value)), value);
    }
}
