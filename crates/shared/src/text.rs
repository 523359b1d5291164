//! Text derivations for articles
//!
//! Slug and read-time rules are part of the public contract: slugs are what
//! article URLs are built from, and read time is displayed on every listing.

/// Derive a URL slug from a title.
///
/// Lowercases the title, collapses every run of non-alphanumeric characters
/// into a single hyphen, and strips leading/trailing hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Estimated read time in whole minutes: ceil(words / 200), at least 1 for
/// non-empty content. Empty content reads in 0 minutes.
pub fn read_time_minutes(content: &str) -> i32 {
    let words = content.split_whitespace().count() as i32;
    if words == 0 {
        return 0;
    }
    (words + 199) / 200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_from_title_with_punctuation() {
        assert_eq!(slugify("Hello, World! 2024"), "hello-world-2024");
    }

    #[test]
    fn slug_collapses_runs_and_trims_hyphens() {
        assert_eq!(slugify("  --How to   Grow!!  "), "how-to-grow");
        assert_eq!(slugify("already-a-slug"), "already-a-slug");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn slug_contains_only_lowercase_alphanumerics_and_single_hyphens() {
        let slug = slugify("The $10k/mo Newsletter — A Case Study (Part 2)");
        assert!(!slug.starts_with('-') && !slug.ends_with('-'));
        assert!(!slug.contains("--"));
        assert!(slug
            .chars()
            .all(|c| c == '-' || c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn read_time_rounds_up() {
        assert_eq!(read_time_minutes(""), 0);
        assert_eq!(read_time_minutes("one two three"), 1);
        let exactly_200 = vec!["word"; 200].join(" ");
        assert_eq!(read_time_minutes(&exactly_200), 1);
        let two_hundred_one = vec!["word"; 201].join(" ");
        assert_eq!(read_time_minutes(&two_hundred_one), 2);
        let one_thousand = vec!["word"; 1000].join(" ");
        assert_eq!(read_time_minutes(&one_thousand), 5);
    }

    #[test]
    fn read_time_is_at_least_one_for_nonempty_content() {
        assert_eq!(read_time_minutes("hi"), 1);
    }
}
