use std::io::{ErrorKind, Result};

use rand::{distr::Alphanumeric, Rng};

pub(crate) trait IoKindFilter<T> {
    fn filter_kind(self, ignored: ErrorKind) -> Result<Option<T>>;
}

impl<T> IoKindFilter<T> for Result<T> {
    fn filter_kind(self, ignored: ErrorKind) -> Result<Option<T>> {
        match self {
            Ok(result) => Ok(Some(result)),
            Err(err) if err.kind() == ignored => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Expands a temporary file pattern: the last `*` is replaced by a random
/// alphanumeric string, or the string is appended if there is no `*`.
pub(crate) fn generate_tmpname(pattern: &str) -> String {
    let rand_string: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    match pattern.rfind('*') {
        Some(pos) => format!("{}{}{}", &pattern[..pos], rand_string, &pattern[pos + 1..]),
        None => format!("{}{}", pattern, rand_string),
    }
}

/// Lexically normalizes a slash separated path: drops empty and `.`
/// components, folds `..` into its parent where there is one.
///
/// The empty path normalizes to `.`.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = vec![];

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // ".." above the root is the root
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    match (rooted, parts.is_empty()) {
        (true, _) => format!("/{}", parts.join("/")),
        (false, true) => ".".to_string(),
        (false, false) => parts.join("/"),
    }
}

/// Joins two slash separated paths and normalizes the result.
pub(crate) fn join_path(dir: &str, name: &str) -> String {
    clean_path(&format!("{dir}/{name}"))
}

#[cfg(test)]
mod test {
    use std::io::Error;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_generate_tmpname() {
        let name = generate_tmpname("index.json.*.tmp");
        assert!(name.starts_with("index.json."));
        assert!(name.ends_with(".tmp"));
        assert_eq!(name.len(), "index.json..tmp".len() + 12);
        assert!(!name.contains('*'));

        let name = generate_tmpname(".tmp-");
        assert!(name.starts_with(".tmp-"));
        assert_eq!(name.len(), 5 + 12);

        assert_ne!(generate_tmpname("*"), generate_tmpname("*"));
    }

    #[test]
    fn test_clean_path() {
        let cases = [
            ("", "."),
            (".", "."),
            ("a", "a"),
            ("a/", "a"),
            ("./a/./b", "a/b"),
            ("a//b", "a/b"),
            ("a/../b", "b"),
            ("a/..", "."),
            ("../a", "../a"),
            ("../../a/..", "../.."),
            ("/", "/"),
            ("/..", "/"),
            ("/a/../../b", "/b"),
        ];
        for (input, expected) in cases {
            assert_eq!(clean_path(input), expected, "input: {input}");
        }
        assert_eq!(join_path("layouts/app", "index.json"), "layouts/app/index.json");
        assert_eq!(join_path(".", "oci-layout"), "oci-layout");
    }

    #[test]
    fn test_filter_kind() {
        let exists: Result<()> = Err(Error::from(ErrorKind::AlreadyExists));
        assert!(exists.filter_kind(ErrorKind::AlreadyExists).unwrap().is_none());

        let denied: Result<()> = Err(Error::from(ErrorKind::PermissionDenied));
        assert_eq!(
            denied
                .filter_kind(ErrorKind::AlreadyExists)
                .unwrap_err()
                .kind(),
            ErrorKind::PermissionDenied
        );

        assert_eq!(Ok(3).filter_kind(ErrorKind::NotFound).unwrap(), Some(3));
    }
}
