use crate::fields::{extract_top_level_frontmatter_fields, FieldMap, FieldValue};

/// A `[[TARGET]]` or `[[TARGET|DISPLAY]]` occurrence, unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedWikiLink {
    pub target: String,
    pub display: Option<String>,
}

/// The pure result of parsing one Markdown file's bytes. Carries no I/O and no
/// resolution: the Scanner and Resolver build on top of this.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote {
    pub title: String,
    pub frontmatter: FieldMap,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    pub wikilinks: Vec<ParsedWikiLink>,
    pub word_count: usize,
    pub char_count: usize,
    pub content_hash: String,
    pub frontmatter_broken: bool,
}

enum FrontmatterParse {
    None,
    Valid(serde_yaml::Value),
    Broken,
}

/// Parse one note. Never fails: malformed frontmatter degrades to an empty
/// [`FieldMap`] with `frontmatter_broken` set, never a dropped note.
pub fn parse_note(relative_path: &str, content: &[u8]) -> ParsedNote {
    use sha2::{Digest, Sha256};
    let content_hash = format!("{:x}", Sha256::digest(content));

    let text = String::from_utf8_lossy(content);
    let (frontmatter, body) = split_frontmatter(&text);

    let (fields, frontmatter_broken) = match &frontmatter {
        FrontmatterParse::Valid(v) => (extract_top_level_frontmatter_fields(v), false),
        FrontmatterParse::None => (FieldMap::new(), false),
        FrontmatterParse::Broken => (FieldMap::new(), true),
    };

    let aliases = fields
        .get("aliases")
        .map(field_value_to_string_list)
        .unwrap_or_default();

    let mut tags = Vec::new();
    let mut seen_tags = std::collections::HashSet::new();
    if let Some(v) = fields.get("tags") {
        for tag in field_value_to_string_list(v) {
            if let Some(t) = normalize_tag(&tag) {
                if seen_tags.insert(t.clone()) {
                    tags.push(t);
                }
            }
        }
    }
    for tag in extract_inline_tags(body) {
        if seen_tags.insert(tag.clone()) {
            tags.push(tag);
        }
    }

    let wikilinks = extract_wikilinks(body);

    let title = extract_title(relative_path, &fields, body);

    let word_count = body.split_whitespace().count();
    let char_count = body.len();

    ParsedNote {
        title,
        frontmatter: fields,
        aliases,
        tags,
        wikilinks,
        word_count,
        char_count,
        content_hash,
        frontmatter_broken,
    }
}

fn field_value_to_string_list(v: &FieldValue) -> Vec<String> {
    match v {
        FieldValue::List(items) => items
            .iter()
            .filter_map(|i| match i {
                FieldValue::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        FieldValue::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn split_frontmatter(content: &str) -> (FrontmatterParse, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (FrontmatterParse::None, content);
    };

    let mut idx = 0usize;
    let bytes = rest.as_bytes();
    while idx < bytes.len() {
        let line_end = match rest[idx..].find('\n') {
            Some(off) => idx + off + 1,
            None => bytes.len(),
        };
        let line = rest[idx..line_end].trim_end_matches(['\r', '\n']);
        if line == "---" {
            let fm_text = &rest[..idx];
            let body = &rest[line_end..];
            return match serde_yaml::from_str::<serde_yaml::Value>(fm_text) {
                Ok(v) => (FrontmatterParse::Valid(v), body),
                Err(_) => (FrontmatterParse::Broken, body),
            };
        }
        idx = line_end;
    }

    (FrontmatterParse::Broken, content)
}

fn extract_title(relative_path: &str, fields: &FieldMap, body: &str) -> String {
    if let Some(FieldValue::String(s)) = fields.get("title") {
        let s = s.trim();
        if !s.is_empty() {
            return s.to_string();
        }
    }

    let mut in_fenced = false;
    for line in body.lines() {
        if is_fence(line) {
            in_fenced = !in_fenced;
            continue;
        }
        if in_fenced {
            continue;
        }
        if let Some(h) = line.strip_prefix("# ") {
            let h = h.trim();
            if !h.is_empty() {
                return h.to_string();
            }
        }
    }

    std::path::Path::new(relative_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn extract_inline_tags(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_fenced = false;

    for line in body.lines() {
        if is_fence(line) {
            in_fenced = !in_fenced;
            continue;
        }
        if in_fenced {
            continue;
        }

        let bytes = line.as_bytes();
        let mut i = 0usize;
        while i < bytes.len() {
            if bytes[i] != b'#' {
                i += 1;
                continue;
            }
            // Heading marker, not a tag.
            if i + 1 < bytes.len() && bytes[i + 1] == b' ' {
                i += 1;
                continue;
            }
            if i > 0 {
                let prev = bytes[i - 1] as char;
                if prev.is_alphanumeric() || prev == '/' {
                    i += 1;
                    continue;
                }
            }

            let mut j = i + 1;
            while j < bytes.len() && is_tag_char(bytes[j] as char) {
                j += 1;
            }
            if j > i + 1 {
                if let Some(tag) = normalize_tag(&line[i + 1..j]) {
                    out.push(tag);
                }
            }
            i = j.max(i + 1);
        }
    }

    out
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/')
}

fn normalize_tag(raw: &str) -> Option<String> {
    let s = raw.trim().trim_start_matches('#').trim_end_matches('/').trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_lowercase())
    }
}

fn extract_wikilinks(body: &str) -> Vec<ParsedWikiLink> {
    let mut out = Vec::new();
    let mut in_fenced = false;

    for line in body.lines() {
        if is_fence(line) {
            in_fenced = !in_fenced;
            continue;
        }
        if in_fenced {
            continue;
        }

        let bytes = line.as_bytes();
        let mut i = 0usize;
        while i + 1 < bytes.len() {
            if bytes[i] == b'[' && bytes[i + 1] == b'[' {
                let start = i + 2;
                if let Some(end_rel) = line[start..].find("]]") {
                    let inner = &line[start..start + end_rel];
                    if let Some(link) = normalize_wikilink(inner) {
                        out.push(link);
                    }
                    i = start + end_rel + 2;
                    continue;
                }
            }
            i += 1;
        }
    }

    out
}

fn normalize_wikilink(inner: &str) -> Option<ParsedWikiLink> {
    let (target, display) = match inner.find('|') {
        Some(pos) => (&inner[..pos], Some(inner[pos + 1..].trim().to_string())),
        None => (inner, None),
    };
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    Some(ParsedWikiLink {
        target: target.to_string(),
        display: display.filter(|d| !d.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_title_wins_over_heading() {
        let note = parse_note(
            "notes/a.md",
            b"---\ntitle: Hello\ntags: [Foo, bar/baz]\n---\n\n# Heading\nBody #Quux\n",
        );
        assert_eq!(note.title, "Hello");
        assert!(note.tags.contains(&"foo".to_string()));
        assert!(note.tags.contains(&"bar/baz".to_string()));
        assert!(note.tags.contains(&"quux".to_string()));
        assert!(!note.frontmatter_broken);
    }

    #[test]
    fn falls_back_to_heading_then_filename() {
        let with_heading = parse_note("a.md", b"# My Title\nbody\n");
        assert_eq!(with_heading.title, "My Title");

        let bare = parse_note("notes/untitled-note.md", b"just text\n");
        assert_eq!(bare.title, "untitled-note");
    }

    #[test]
    fn malformed_frontmatter_is_non_fatal() {
        let note = parse_note("a.md", b"---\n[ this is not: yaml: at all\nbody\n");
        assert!(note.frontmatter_broken);
        assert!(note.frontmatter.is_empty());
    }

    #[test]
    fn fenced_code_blocks_are_excluded_from_tags_and_links() {
        let note = parse_note(
            "a.md",
            b"Here:\n```\n#notatag\n[[notalink]]\n```\nReal #tag and [[link]].\n",
        );
        assert!(note.tags.contains(&"tag".to_string()));
        assert!(!note.tags.contains(&"notatag".to_string()));
        assert!(note.wikilinks.iter().any(|l| l.target == "link"));
        assert!(!note.wikilinks.iter().any(|l| l.target == "notalink"));
    }

    #[test]
    fn headings_are_not_tags() {
        let note = parse_note("a.md", b"# Title\n## Subtitle\n#tag\n");
        assert!(!note.tags.contains(&"title".to_string()));
        assert!(note.tags.contains(&"tag".to_string()));
    }

    #[test]
    fn url_fragment_is_not_a_tag() {
        let note = parse_note("a.md", b"See http://example.com/#tag for details.\n");
        assert!(!note.tags.contains(&"tag".to_string()));
    }

    #[test]
    fn wikilink_alias_is_split_into_target_and_display() {
        let note = parse_note("a.md", b"See [[Target|Alias]] and [[Other#Section]].");
        assert_eq!(
            note.wikilinks[0],
            ParsedWikiLink {
                target: "Target".into(),
                display: Some("Alias".into()),
            }
        );
        assert_eq!(note.wikilinks[1].target, "Other#Section");
        assert_eq!(note.wikilinks[1].display, None);
    }

    #[test]
    fn aliases_come_from_frontmatter_sequence() {
        let note = parse_note("a.md", b"---\naliases: [One, Two]\n---\nbody\n");
        assert_eq!(note.aliases, vec!["One".to_string(), "Two".to_string()]);
    }

    #[test]
    fn content_hash_changes_with_any_byte() {
        let a = parse_note("a.md", b"hello");
        let b = parse_note("a.md", b"hellp");
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn word_and_char_counts_exclude_frontmatter() {
        let note = parse_note("a.md", b"---\ntitle: x\n---\none two three\n");
        assert_eq!(note.word_count, 3);
        assert_eq!(note.char_count, "one two three\n".len());
    }
}
