/// Turns a display name into a URL slug.
///
/// Lowercases ASCII letters, keeps digits, and collapses every other run of
/// characters into a single `-`. Leading and trailing separators are dropped.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Dark Chocolate Bunny"), "dark-chocolate-bunny");
        assert_eq!(slugify("  Milk -- 70%  "), "milk-70");
        assert_eq!(slugify("already-a-slug"), "already-a-slug");
    }

    #[test]
    fn slugify_drops_non_ascii() {
        assert_eq!(slugify("Шоколад"), "");
        assert_eq!(slugify("Café Noir"), "caf-noir");
    }
}
