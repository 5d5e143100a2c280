//! Path validation and the artifact layout.

use std::path::{Component, Path, PathBuf};

use skiff_manifest::models::Digest;

use crate::error::{ErrorKind, Result};

/// Relative storage path of the artifact with `digest`:
/// `<algorithm>/<first two hex>/<hex>`.
///
/// The two-character fan-out keeps any single directory from growing to
/// hold every blob of a large mirror.
///
/// ```
/// use skiff_manifest::models::Digest;
/// use skiff_storage::artifact_path;
///
/// let path = artifact_path(&Digest::of(b""));
/// assert_eq!(
///     path.to_str().unwrap(),
///     "sha256/e3/e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
pub fn artifact_path(digest: &Digest) -> PathBuf {
    let hex = digest.hex();
    [Digest::ALGORITHM, &hex[..2], hex].iter().collect()
}

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// ```
/// use std::path::Path;
/// use skiff_storage::validate_path;
///
/// assert!(validate_path("sha256/ab/abcd").is_ok());
/// assert!(validate_path("a/../blob").is_ok()); // (never leaves storage root)
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(validate_path("tmp/.././sha256//ab/").unwrap(), Path::new("sha256/ab"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let invalid = || ErrorKind::InvalidPath(path.as_ref().to_path_buf());
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but
                // truncate in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("sha256/ab/abcdef", "sha256/ab/abcdef")]
    #[case("sha256//ab//abcdef", "sha256/ab/abcdef")]
    #[case("./sha256/./ab/abcdef", "sha256/ab/abcdef")]
    #[case("sha256/ab/", "sha256/ab")]
    #[case("/sha256/ab", "sha256/ab")]
    #[case("sha256/tmp/..", "sha256")]
    fn test_normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("//")]
    #[case("..")]
    #[case("../sha256")]
    #[case("sha256/../../etc")]
    #[case("sha\0256")]
    fn test_rejects(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_artifact_path_is_valid_and_fanned_out() {
        let digest = Digest::of(b"layer");
        let path = artifact_path(&digest);
        assert_eq!(validate(&path).unwrap(), path);
        let parts: Vec<_> = path.iter().map(|part| part.to_str().unwrap()).collect();
        assert_eq!(parts, vec!["sha256", &digest.hex()[..2], digest.hex()]);
    }
}
