//! Entry-name normalisation for extraction.
//!
//! Archive entry names are untrusted. Before anything is written, a name is
//! split on both separators and rebuilt from its normal components only; any
//! name that would leave the destination directory is rejected.

use std::path::{Path, PathBuf};

/// Why an entry name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafeName {
    /// Contains a `..` component.
    ParentComponent,
    /// Starts with a separator.
    Absolute,
    /// Starts with a drive letter (`C:`) or UNC prefix.
    Prefix,
    /// Contains a NUL byte.
    Nul,
    /// Has no components left after normalisation.
    Empty,
}

impl std::fmt::Display for UnsafeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ParentComponent => "contains a '..' component",
            Self::Absolute => "is an absolute path",
            Self::Prefix => "starts with a drive or UNC prefix",
            Self::Nul => "contains a NUL byte",
            Self::Empty => "names no file",
        })
    }
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Normalise an entry name into a relative path.
///
/// Backslashes count as separators, empty and `.` components are dropped.
pub fn normalize_entry_name(name: &str) -> Result<PathBuf, UnsafeName> {
    if name.contains('\0') {
        return Err(UnsafeName::Nul);
    }
    let unified = name.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(UnsafeName::Absolute);
    }
    if has_drive_prefix(&unified) {
        return Err(UnsafeName::Prefix);
    }

    let mut clean = PathBuf::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(UnsafeName::ParentComponent),
            part => clean.push(part),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(UnsafeName::Empty);
    }
    Ok(clean)
}

/// Resolve an entry name below `dest`.
pub fn safe_join(dest: &Path, name: &str) -> Result<PathBuf, UnsafeName> {
    let relative = normalize_entry_name(name)?;
    let out = dest.join(relative);
    // `Path::join` replaces the base when the tail carries a prefix.
    if !out.starts_with(dest) {
        return Err(UnsafeName::Prefix);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Component;

    #[test]
    fn keeps_ordinary_names() {
        assert_eq!(
            normalize_entry_name("docs/readme.txt").unwrap(),
            Path::new("docs").join("readme.txt")
        );
        assert_eq!(
            normalize_entry_name("./a//b/./c").unwrap(),
            Path::new("a").join("b").join("c")
        );
        assert_eq!(
            normalize_entry_name("win\\style\\path.txt").unwrap(),
            Path::new("win").join("style").join("path.txt")
        );
        assert_eq!(normalize_entry_name("dir/").unwrap(), Path::new("dir"));
        assert_eq!(
            normalize_entry_name("..hidden/file..").unwrap(),
            Path::new("..hidden").join("file..")
        );
    }

    #[test]
    fn rejects_escaping_names() {
        assert_eq!(normalize_entry_name("../../evil"), Err(UnsafeName::ParentComponent));
        assert_eq!(normalize_entry_name("a/../../b"), Err(UnsafeName::ParentComponent));
        assert_eq!(normalize_entry_name("a\\..\\b"), Err(UnsafeName::ParentComponent));
        assert_eq!(normalize_entry_name("/etc/passwd"), Err(UnsafeName::Absolute));
        assert_eq!(normalize_entry_name("\\\\server\\share"), Err(UnsafeName::Absolute));
        assert_eq!(normalize_entry_name("C:\\Windows"), Err(UnsafeName::Prefix));
        assert_eq!(normalize_entry_name("c:relative"), Err(UnsafeName::Prefix));
        assert_eq!(normalize_entry_name("a\0b"), Err(UnsafeName::Nul));
        assert_eq!(normalize_entry_name("./"), Err(UnsafeName::Empty));
        assert_eq!(normalize_entry_name(""), Err(UnsafeName::Empty));
    }

    #[test]
    fn joins_below_destination() {
        let dest = Path::new("/tmp/out");
        assert_eq!(
            safe_join(dest, "a/b.txt").unwrap(),
            Path::new("/tmp/out/a/b.txt")
        );
        assert!(safe_join(dest, "../b.txt").is_err());
    }

    /// Names assembled from ordinary, dot, parent and separator pieces.
    fn entry_name_strategy() -> impl Strategy<Value = String> {
        let piece = prop_oneof![
            "[a-z]{1,6}",
            Just(".".to_string()),
            Just("..".to_string()),
            Just("".to_string()),
            Just("C:".to_string()),
        ];
        (
            proptest::collection::vec(piece, 1..6),
            prop_oneof![Just("/"), Just("\\")],
        )
            .prop_map(|(parts, sep)| parts.join(sep))
    }

    proptest! {
        /// Whatever the name, an accepted path stays inside the destination.
        #[test]
        fn accepted_names_never_escape(name in entry_name_strategy()) {
            let dest = Path::new("/srv/extract");
            if let Ok(out) = safe_join(dest, &name) {
                prop_assert!(out.starts_with(dest));
                let relative = out.strip_prefix(dest).unwrap();
                prop_assert!(relative.components().all(|c| matches!(c, Component::Normal(_))));
            }
        }

        /// Names containing a parent component are always rejected.
        #[test]
        fn parent_components_are_rejected(
            prefix in "[a-z]{1,5}",
            suffix in "[a-z]{1,5}"
        ) {
            let name = format!("{prefix}/../{suffix}");
            prop_assert_eq!(normalize_entry_name(&name), Err(UnsafeName::ParentComponent));
        }
    }
}
