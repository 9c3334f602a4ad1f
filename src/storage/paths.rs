//! Blob key layout and path validation for client-supplied file names.
//!
//! Key structure:
//! - `sources/{job_id}/{relative_path}` - uploaded source tree
//! - `results/{course_id}/{relative_path}` - build artifacts
//! - `logs/{job_id}/generation.log` - accumulated build log

use thiserror::Error;
use uuid::Uuid;

/// Maximum directory depth accepted for an uploaded file path.
pub const MAX_PATH_DEPTH: usize = 10;

/// Characters that are never valid inside a path segment.
const FORBIDDEN_CHARS: &[char] = &[':', '*', '?', '"', '<', '>', '|'];

/// Extensions accepted for uploaded presentation assets.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "md", "markdown", "css", "js", "ts", "json", "html", "png", "jpg", "jpeg", "gif", "svg",
    "webp", "ico", "pdf", "txt", "yaml", "yml", "toml", "woff", "woff2", "ttf", "mp3", "mp4",
    "webm", "vue",
];

pub fn source_key(job_id: Uuid, relative: &str) -> String {
    format!("sources/{}/{}", job_id, relative)
}

pub fn source_prefix(job_id: Uuid) -> String {
    format!("sources/{}/", job_id)
}

pub fn result_key(course_id: Uuid, relative: &str) -> String {
    format!("results/{}/{}", course_id, relative)
}

pub fn result_prefix(course_id: Uuid) -> String {
    format!("results/{}/", course_id)
}

pub fn log_key(job_id: Uuid) -> String {
    format!("logs/{}/generation.log", job_id)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathValidationError {
    #[error("path is empty")]
    Empty,
    #[error("path must be relative: {0}")]
    Absolute(String),
    #[error("path contains a parent-directory segment: {0}")]
    ParentTraversal(String),
    #[error("path exceeds {MAX_PATH_DEPTH} segments: {0}")]
    TooDeep(String),
    #[error("path segment contains forbidden character: {0}")]
    ForbiddenCharacter(String),
    #[error("file extension not allowed for presentation assets: {0}")]
    DisallowedExtension(String),
}

/// Structural rules shared by every client-supplied relative path:
/// relative, depth-bounded, no parent-directory segments, no forbidden
/// characters. Separators are normalized to `/` by the caller.
fn validate_segments(path: &str) -> Result<Vec<&str>, PathValidationError> {
    if path.is_empty() {
        return Err(PathValidationError::Empty);
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(PathValidationError::Absolute(path.to_string()));
    }

    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > MAX_PATH_DEPTH {
        return Err(PathValidationError::TooDeep(path.to_string()));
    }

    for segment in &segments {
        if *segment == ".." {
            return Err(PathValidationError::ParentTraversal(path.to_string()));
        }
        if segment.contains(FORBIDDEN_CHARS) || segment.contains('\\') {
            return Err(PathValidationError::ForbiddenCharacter(path.to_string()));
        }
    }

    Ok(segments)
}

/// Validate a client-supplied relative file path before it is used as part
/// of an upload key. Adds the presentation-asset extension allow-list on
/// top of the structural rules.
pub fn validate_source_path(path: &str) -> Result<(), PathValidationError> {
    let segments = validate_segments(path)?;

    let file_name = segments.last().unwrap_or(&"");
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(PathValidationError::DisallowedExtension(path.to_string())),
    }
}

/// Validate a client-supplied artifact path before it is used to read a
/// result key. Structural rules only: a published site carries whatever
/// file types the build emitted, so there is no extension allow-list.
pub fn validate_result_path(path: &str) -> Result<(), PathValidationError> {
    validate_segments(path).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let job = Uuid::nil();
        let course = Uuid::nil();
        assert_eq!(
            source_key(job, "slides.md"),
            format!("sources/{}/slides.md", job)
        );
        assert_eq!(
            result_key(course, "index.html"),
            format!("results/{}/index.html", course)
        );
        assert_eq!(log_key(job), format!("logs/{}/generation.log", job));
        assert!(source_key(job, "a/b.md").starts_with(&source_prefix(job)));
    }

    #[test]
    fn test_validate_accepts_normal_paths() {
        assert!(validate_source_path("slides.md").is_ok());
        assert!(validate_source_path("assets/logo.png").is_ok());
        assert!(validate_source_path("styles/theme.css").is_ok());
        assert!(validate_source_path("components/Counter.vue").is_ok());
    }

    #[test]
    fn test_validate_rejects_traversal() {
        assert_eq!(
            validate_source_path("../../etc/passwd"),
            Err(PathValidationError::ParentTraversal(
                "../../etc/passwd".to_string()
            ))
        );
        assert!(validate_source_path("a/../b.md").is_err());
    }

    #[test]
    fn test_validate_rejects_absolute() {
        assert!(matches!(
            validate_source_path("/etc/passwd"),
            Err(PathValidationError::Absolute(_))
        ));
    }

    #[test]
    fn test_validate_rejects_deep_paths() {
        let deep = (0..11).map(|i| format!("d{}", i)).collect::<Vec<_>>();
        let path = format!("{}/x.md", deep.join("/"));
        assert!(matches!(
            validate_source_path(&path),
            Err(PathValidationError::TooDeep(_))
        ));
    }

    #[test]
    fn test_validate_rejects_forbidden_characters() {
        assert!(matches!(
            validate_source_path("bad:name.md"),
            Err(PathValidationError::ForbiddenCharacter(_))
        ));
        assert!(validate_source_path("what?.md").is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_extensions() {
        assert!(matches!(
            validate_source_path("payload.exe"),
            Err(PathValidationError::DisallowedExtension(_))
        ));
        assert!(validate_source_path("no_extension").is_err());
    }

    #[test]
    fn test_result_path_accepts_build_output() {
        assert!(validate_result_path("index.html").is_ok());
        assert!(validate_result_path("assets/index-abc123.js").is_ok());
        // No extension allow-list on the read side.
        assert!(validate_result_path("manifest.webmanifest").is_ok());
        assert!(validate_result_path("assets/chunk.js.map").is_ok());
    }

    #[test]
    fn test_result_path_rejects_traversal() {
        assert_eq!(
            validate_result_path("../../../../etc/passwd"),
            Err(PathValidationError::ParentTraversal(
                "../../../../etc/passwd".to_string()
            ))
        );
        assert!(matches!(
            validate_result_path("/etc/passwd"),
            Err(PathValidationError::Absolute(_))
        ));
        assert!(matches!(
            validate_result_path("..\\..\\secret"),
            Err(PathValidationError::ForbiddenCharacter(_))
        ));
        assert!(validate_result_path("").is_err());
    }
}
