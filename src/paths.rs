//! Vault-relative path helpers.
//!
//! Every path citemark handles is `/`-separated and relative to the content
//! tree root, matching how the host index reports them. These helpers operate
//! on strings directly so path math is identical on every platform.

/// Directory portion of a path, without the trailing separator. Empty for
/// root-level paths.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Final component of a path.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// File name without its final extension. A leading dot does not count as an
/// extension separator.
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Final extension, without the dot. Empty when there is none.
pub fn extension(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &name[idx + 1..],
    }
}

/// Join a directory and a name, tolerating an empty directory.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Normalize a host-reported path: backslashes to slashes, strip any leading
/// `./` or `/`.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string();
    trimmed
}

/// Re-root `path` from `old_dir` to `new_dir`, preserving the remainder.
/// Returns `None` when `path` does not live under `old_dir`.
pub fn apply_dir_delta(path: &str, old_dir: &str, new_dir: &str) -> Option<String> {
    if old_dir.is_empty() {
        if path.contains('/') {
            return None;
        }
        return Some(join(new_dir, path));
    }
    let rest = path.strip_prefix(old_dir)?.strip_prefix('/')?;
    Some(join(new_dir, rest))
}

/// Reduce a candidate file name to something safe on every platform:
/// reserved characters and control characters are stripped, whitespace and
/// underscore runs collapse to a single character, and edge separators are
/// trimmed.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_space = false;
    let mut prev_underscore = false;
    for ch in name.chars() {
        match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => continue,
            c if c.is_control() => continue,
            c if c.is_whitespace() => {
                if !prev_space {
                    out.push(' ');
                }
                prev_space = true;
                prev_underscore = false;
            }
            '_' => {
                if !prev_underscore {
                    out.push('_');
                }
                prev_underscore = true;
                prev_space = false;
            }
            c => {
                out.push(c);
                prev_space = false;
                prev_underscore = false;
            }
        }
    }
    out.trim_matches(|c: char| matches!(c, ' ' | '.' | '_' | '-'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("notes/deep/a.md"), "notes/deep");
        assert_eq!(parent("a.md"), "");
        assert_eq!(file_name("notes/a.md"), "a.md");
        assert_eq!(file_name("a.md"), "a.md");
    }

    #[test]
    fn test_stem_and_extension() {
        assert_eq!(file_stem("notes/paper.pdf"), "paper");
        assert_eq!(extension("notes/paper.PDF"), "PDF");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert_eq!(extension(".hidden"), "");
        assert_eq!(extension("no-ext"), "");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "a.md"), "a.md");
        assert_eq!(join("notes", "a.md"), "notes/a.md");
        assert_eq!(join("notes/", "a.md"), "notes/a.md");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("./notes\\a.md"), "notes/a.md");
        assert_eq!(normalize("/notes/a.md"), "notes/a.md");
    }

    #[test]
    fn test_apply_dir_delta() {
        assert_eq!(
            apply_dir_delta("notes/A.pdf", "notes", "archive"),
            Some("archive/A.pdf".to_string())
        );
        assert_eq!(
            apply_dir_delta("notes/deep/A.pdf", "notes", "archive"),
            Some("archive/deep/A.pdf".to_string())
        );
        assert_eq!(apply_dir_delta("other/A.pdf", "notes", "archive"), None);
        assert_eq!(
            apply_dir_delta("A.pdf", "", "archive"),
            Some("archive/A.pdf".to_string())
        );
        assert_eq!(apply_dir_delta("notes/A.pdf", "", "archive"), None);
    }

    #[test]
    fn test_sanitize_strips_reserved() {
        assert_eq!(sanitize_file_name("a:b*c?d\"e<f>g|h"), "abcdefgh");
        assert_eq!(sanitize_file_name("a/b\\c"), "abc");
    }

    #[test]
    fn test_sanitize_collapses_runs_and_trims_edges() {
        assert_eq!(sanitize_file_name("  a   b  "), "a b");
        assert_eq!(sanitize_file_name("__a___b__"), "a_b");
        assert_eq!(sanitize_file_name(".-_ name _-."), "name");
    }
}
