//! Path classification and canonicalization.
//!
//! Callers hand us paths in whatever convention their platform uses:
//! POSIX, drive-letter, UNC shares, `~` and `%VAR%` anchored paths. The
//! index only ever stores one form: a relative folder, `/`-separated, with
//! a trailing `/` and the application prefix applied exactly once.
//!
//! Absolute-path recognition looks at *where* separators sit, never at
//! which separator character was used, so separators can be normalized
//! freely before or after classification.

use crate::mime;
use crate::{Error, Result};

/// Separator characters recognized in caller-supplied paths.
///
/// Only `/` and `\` split segments. Any other character, `:` included,
/// is part of a segment name.
pub const SEPARATORS: [char; 2] = ['/', '\\'];

/// Separator used for canonical folders in the index.
pub const FOLDER_SEPARATOR: char = '/';

/// Suffix marker between a file stem and its version number.
const VERSION_MARKER: &str = "_v";

fn is_separator(c: char) -> bool {
    SEPARATORS.contains(&c)
}

/// Check whether a path is absolute under any supported convention.
///
/// Rules are applied in order; the first match decides:
/// - empty or whitespace: not absolute
/// - `~/` or `~\`: absolute; a bare `~` or `~user`: not absolute
/// - `%VAR%` followed directly by a separator: absolute
/// - `\\` or `//` (network shares, `\\?\` and `\\.\` device paths): absolute
/// - drive letter, colon and separator (`C:\`, `C:/`): absolute
/// - drive letter and colon without separator (`C:`, `C:file.txt`): not absolute
/// - leading `/`: absolute unless the rest holds an unexpanded `$VAR`
pub fn is_absolute(path: &str) -> bool {
    let path = path.trim();
    let mut chars = path.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let second = chars.next();
    let third = chars.next();

    if first == '~' {
        return second.map_or(false, is_separator);
    }

    if first == '%' {
        if let Some(close) = path[1..].find('%') {
            let close = close + 1;
            let after = path[close + 1..].chars().next();
            if close > 1 && after.map_or(false, is_separator) {
                return true;
            }
        }
    }

    // Covers UNC shares as well as `\\?\` and `\\.\` device paths.
    if path.starts_with("\\\\") || path.starts_with("//") {
        return true;
    }

    if second == Some(':') {
        return first.is_ascii_alphabetic() && third.map_or(false, is_separator);
    }

    if first == '/' {
        return !has_unexpanded_variable(&path[1..]);
    }

    false
}

/// `$NAME` or `${NAME}` left in a path by a shell that never expanded it.
fn has_unexpanded_variable(path: &str) -> bool {
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(&next) = chars.peek() {
                if next.is_ascii_alphabetic() || next == '_' || next == '{' {
                    return true;
                }
            }
        }
    }
    false
}

/// Replace every recognized separator with `target`.
///
/// Leading and trailing separators keep their positions, so the shape
/// that [`is_absolute`] looks at survives the rewrite.
pub fn normalize_separators(path: &str, target: char) -> String {
    path.split(is_separator)
        .collect::<Vec<_>>()
        .join(&target.to_string())
}

/// The last segment of a path, unless the path names a folder.
pub fn file_name(path: &str) -> Option<&str> {
    let path = path.trim();
    if path.is_empty() || path.ends_with(is_separator) {
        return None;
    }
    let name = match path.rfind(is_separator) {
        Some(pos) => &path[pos + 1..],
        None => path,
    };
    match name {
        "." | ".." | "~" => None,
        _ => Some(name),
    }
}

/// Canonical relative folder of `path`, separated with `/`.
///
/// The file name is dropped, leading `.` and `~` are trimmed, and the
/// application `prefix` is applied once: a leading segment that already
/// equals it (ignoring case) is rewritten in the configured casing rather
/// than duplicated. Returns `root_marker` when no segment remains.
pub fn to_relative_folder(path: &str, prefix: Option<&str>, root_marker: &str) -> String {
    relative_folder_with(path, prefix, root_marker, FOLDER_SEPARATOR)
}

/// Canonical folder for a path that is known to name a folder.
pub fn canonical_folder(folder: &str, prefix: Option<&str>) -> String {
    let mut folder = folder.trim().to_string();
    folder.push(FOLDER_SEPARATOR);
    to_relative_folder(&folder, prefix, "")
}

fn relative_folder_with(path: &str, prefix: Option<&str>, root_marker: &str, sep: char) -> String {
    let path = path.trim();
    let folder_part = if path.ends_with(is_separator) {
        path
    } else {
        match path.rfind(is_separator) {
            Some(pos) => &path[..pos],
            None => "",
        }
    };

    let trimmed = folder_part.trim_start_matches(|c: char| c == '.' || c == '~');
    let mut segments: Vec<&str> = trimmed
        .split(is_separator)
        .filter(|s| !s.trim().is_empty())
        .collect();

    let prefix_segments: Vec<&str> = prefix
        .unwrap_or("")
        .split(is_separator)
        .filter(|s| !s.trim().is_empty())
        .collect();

    if !prefix_segments.is_empty() {
        let already_prefixed = segments.len() >= prefix_segments.len()
            && segments
                .iter()
                .zip(&prefix_segments)
                .all(|(seg, pre)| seg.eq_ignore_ascii_case(pre));
        if already_prefixed {
            segments.drain(..prefix_segments.len());
        }
        let mut scoped = prefix_segments;
        scoped.extend(segments);
        segments = scoped;
    }

    if segments.is_empty() {
        return root_marker.to_string();
    }

    let mut out = segments.join(&sep.to_string());
    out.push(sep);
    out
}

/// Resolve `path` against an absolute `root`.
///
/// Absolute paths are returned unchanged. Relative paths are canonicalized
/// against `prefix` and joined to `root` using the separator `root` itself
/// is written with. Trailing separators on `root` are trimmed first.
///
/// # Errors
/// - `root` is not an absolute path
pub fn to_absolute_path(path: &str, root: &str, prefix: Option<&str>) -> Result<String> {
    if is_absolute(path) {
        return Ok(path.to_string());
    }

    let sep = native_separator(root).ok_or_else(|| {
        Error::InvalidPath(format!("Root '{}' is not an absolute path", root))
    })?;

    let folder = relative_folder_with(path, prefix, "", sep);
    let file = file_name(path).unwrap_or("");
    let base = root.trim().trim_end_matches(is_separator);

    Ok(format!("{}{}{}{}", base, sep, folder, file))
}

/// Separator an absolute path is written with.
///
/// Every absolute shape places a separator before its first segment, so
/// the first separator found is the native one.
fn native_separator(root: &str) -> Option<char> {
    if !is_absolute(root) {
        return None;
    }
    root.trim().chars().find(|c| is_separator(*c))
}

/// Split a file name into stem and extension (extension keeps its dot).
///
/// Dot-files such as `.env` have no extension.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => (&file_name[..pos], &file_name[pos..]),
        _ => (file_name, ""),
    }
}

/// Strip a trailing `_v<N>` version marker from a stem.
pub fn strip_version_suffix(stem: &str) -> (&str, Option<u32>) {
    if let Some((head, digits)) = stem.rsplit_once(VERSION_MARKER) {
        if !head.is_empty() && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(version) = digits.parse() {
                return (head, Some(version));
            }
        }
    }
    (stem, None)
}

/// File name providers store a specific version under.
pub fn versioned_file_name(name: &str, version: u32, extension: &str) -> String {
    format!("{}{}{}{}", name, VERSION_MARKER, version, extension)
}

/// Parsed view of a caller-supplied file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Canonical folder, empty for the root.
    pub folder: String,
    /// Stem with any version marker removed.
    pub name: String,
    /// Extension with leading dot, or empty.
    pub extension: String,
    pub mime_type: String,
    /// Version marker found in the stem, if any.
    pub version: Option<u32>,
}

impl PathInfo {
    /// Parse a `folder/name.ext` path under the given application prefix.
    ///
    /// # Errors
    /// - The path has no file name component
    pub fn parse(path: &str, prefix: Option<&str>) -> Result<Self> {
        let file = file_name(path)
            .ok_or_else(|| Error::InvalidPath(format!("'{}' does not name a file", path)))?;
        let (stem, extension) = split_extension(file);
        let (name, version) = strip_version_suffix(stem);

        Ok(Self {
            folder: to_relative_folder(path, prefix, ""),
            name: name.to_string(),
            extension: extension.to_string(),
            mime_type: mime::from_extension(extension).to_string(),
            version,
        })
    }

    /// `name` + `extension`.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_is_absolute_rule_table() {
        let cases = [
            ("", false),
            ("   ", false),
            ("~/x", true),
            ("~\\x", true),
            ("~", false),
            ("~user", false),
            ("%APPDATA%\\x", true),
            ("%APPDATA%/x", true),
            ("%APPDATA%", false),
            ("\\\\server\\share", true),
            ("//server/share", true),
            ("\\\\?\\C:\\x", true),
            ("\\\\.\\pipe\\x", true),
            ("C:\\", true),
            ("C:/", true),
            ("C:", false),
            ("C:file.txt", false),
            ("/usr/local", true),
            ("/home/$USER/x", false),
            ("$HOME/x", false),
            ("relative/path", false),
            ("file.txt", false),
        ];
        for (path, expected) in cases {
            assert_eq!(is_absolute(path), expected, "path {:?}", path);
        }
    }

    #[test]
    fn test_normalize_separators_keeps_positions() {
        assert_eq!(normalize_separators("a\\b/c", '/'), "a/b/c");
        assert_eq!(normalize_separators("\\\\srv\\share\\", '/'), "//srv/share/");
        assert!(is_absolute(&normalize_separators("C:\\x", '/')));
    }

    #[test]
    fn test_other_punctuation_is_not_a_separator() {
        assert_eq!(normalize_separators("a:b|c/d", '/'), "a:b|c/d");
        assert_eq!(to_relative_folder("reports:2024/q1.pdf", None, ""), "reports:2024/");
        assert_eq!(file_name("a:b.txt"), Some("a:b.txt"));
    }

    #[test]
    fn test_relative_folder_drops_file_name() {
        assert_eq!(to_relative_folder("A/B/report.pdf", None, "/"), "A/B/");
        assert_eq!(to_relative_folder("A\\B\\", None, "/"), "A/B/");
        assert_eq!(to_relative_folder("report.pdf", None, "/"), "/");
        assert_eq!(to_relative_folder("./docs/x.txt", None, ""), "docs/");
        assert_eq!(to_relative_folder("~/docs/x.txt", None, ""), "docs/");
    }

    #[test]
    fn test_relative_folder_prefix_applied_once() {
        assert_eq!(to_relative_folder("A/report.pdf", Some("tenant"), ""), "tenant/A/");
        assert_eq!(to_relative_folder("TENANT/A/report.pdf", Some("tenant"), ""), "tenant/A/");
        assert_eq!(to_relative_folder("report.pdf", Some("tenant"), ""), "tenant/");
        assert_eq!(to_relative_folder("org/one/a.txt", Some("org/one"), ""), "org/one/");
        assert_eq!(to_relative_folder("org/a.txt", Some("org/one"), ""), "org/one/org/");
    }

    #[test]
    fn test_canonical_folder() {
        assert_eq!(canonical_folder("A\\B", None), "A/B/");
        assert_eq!(canonical_folder("", None), "");
        assert_eq!(canonical_folder("", Some("t")), "t/");
        assert_eq!(canonical_folder("t/x/", Some("T")), "T/x/");
    }

    #[test]
    fn test_absolute_path_join() {
        assert_eq!(
            to_absolute_path("A/B/report.pdf", "C:\\data\\\\", Some("tenant")).unwrap(),
            "C:\\data\\tenant\\A\\B\\report.pdf"
        );
        assert_eq!(
            to_absolute_path("report.pdf", "/srv/files/", None).unwrap(),
            "/srv/files/report.pdf"
        );
        assert_eq!(
            to_absolute_path("report.pdf", "/srv/files", Some("tenant")).unwrap(),
            "/srv/files/tenant/report.pdf"
        );
        assert_eq!(
            to_absolute_path("Tenant\\x.txt", "//nas/share", Some("tenant")).unwrap(),
            "//nas/share/tenant/x.txt"
        );
    }

    #[test]
    fn test_absolute_path_passthrough_and_bad_root() {
        assert_eq!(to_absolute_path("/etc/x", "C:\\", None).unwrap(), "/etc/x");
        assert!(matches!(
            to_absolute_path("x.txt", "relative/root", None),
            Err(Error::InvalidPath(_))
        ));
        assert!(to_absolute_path("x.txt", "C:", None).is_err());
    }

    #[test]
    fn test_split_and_version_suffix() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".env"), (".env", ""));
        assert_eq!(split_extension("README"), ("README", ""));

        assert_eq!(strip_version_suffix("report_v12"), ("report", Some(12)));
        assert_eq!(strip_version_suffix("report_v"), ("report_v", None));
        assert_eq!(strip_version_suffix("_v3"), ("_v3", None));
        assert_eq!(strip_version_suffix("my_video"), ("my_video", None));
        assert_eq!(versioned_file_name("report", 3, ".pdf"), "report_v3.pdf");
    }

    #[test]
    fn test_path_info_parse() {
        let info = PathInfo::parse("A\\B\\report_v2.pdf", Some("app")).unwrap();
        assert_eq!(info.folder, "app/A/B/");
        assert_eq!(info.name, "report");
        assert_eq!(info.extension, ".pdf");
        assert_eq!(info.mime_type, "application/pdf");
        assert_eq!(info.version, Some(2));
        assert_eq!(info.file_name(), "report.pdf");

        assert!(PathInfo::parse("A/B/", None).is_err());
    }

    fn shuffled(segments: &[String], file: &str, seps: &[bool]) -> String {
        let mut out = String::new();
        for (i, seg) in segments.iter().enumerate() {
            out.push_str(seg);
            out.push(if seps.get(i).copied().unwrap_or(false) { '\\' } else { '/' });
        }
        out.push_str(file);
        out
    }

    proptest! {
        #[test]
        fn prop_relative_folder_is_separator_invariant(
            segments in proptest::collection::vec("[A-Za-z0-9_]{1,8}", 0..6),
            file in "[a-z]{1,8}\\.[a-z]{1,3}",
            seps in proptest::collection::vec(any::<bool>(), 0..6),
            prefix in proptest::option::of("[a-z]{1,6}"),
        ) {
            let canonical = shuffled(&segments, &file, &[]);
            let mixed = shuffled(&segments, &file, &seps);
            prop_assert_eq!(
                to_relative_folder(&canonical, prefix.as_deref(), "/"),
                to_relative_folder(&mixed, prefix.as_deref(), "/")
            );
        }
    }
}
