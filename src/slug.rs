/// Turns heading text or a link fragment into an anchor id.
///
/// Letters are lowercased, runs of anything that is not alphanumeric collapse
/// into a single `-`, and leading/trailing dashes are dropped. Non-ASCII letters
/// are kept so headings in any script still produce a usable id.
#[must_use]
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = true;

    for c in input.trim().chars() {
        if c.is_alphanumeric() || c == '_' {
            out.extend(c.to_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }

    if out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn lowercases_and_dashes() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("  What's new?  "), "what-s-new");
        assert_eq!(slugify("a -- b"), "a-b");
    }

    #[test]
    fn keeps_unicode_letters() {
        assert_eq!(slugify("キーボード ショートカット"), "キーボード-ショートカット");
    }

    #[test]
    fn empty_input_gives_empty_slug() {
        assert_eq!(slugify("   "), "");
        assert_eq!(slugify("!!!"), "");
    }
}
