//! Suggested download paths.
//!
//! The engine decides the final filename and resolves conflicts on its own;
//! what it gets from us is a relative hint of the form
//! `Folder/Artist/Title`, with every segment made safe for common
//! filesystems.

/// Used when a segment sanitizes down to nothing
const UNKNOWN_SEGMENT: &str = "Unknown";

/// Characters rejected by at least one mainstream filesystem
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Make one path segment filesystem-safe.
///
/// Illegal characters and control characters become `_`, surrounding
/// whitespace and dots are trimmed, and a segment that ends up empty (which
/// includes `.` and `..`) becomes `Unknown`.
pub fn sanitize_segment(segment: &str) -> String {
    let replaced: String = segment
        .chars()
        .map(|c| {
            if ILLEGAL_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        UNKNOWN_SEGMENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build `folder/artist/title`.
///
/// `folder` may itself be nested (`Music/Purchases`); its empty, `.` and `..`
/// segments are dropped. Artist and title are always exactly one segment
/// each.
pub fn suggested_path(folder: &str, artist: &str, title: &str) -> String {
    let mut segments: Vec<String> = folder
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(sanitize_segment)
        .collect();
    segments.push(sanitize_segment(artist));
    segments.push(sanitize_segment(title));
    segments.join("/")
}
