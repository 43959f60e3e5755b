/// Join path segments and lexically clean the result.
///
/// Empty segments are ignored, `.` segments are dropped and `..` pops the
/// previous segment. A leading `/` on the first non-empty segment is kept.
/// An empty result becomes `"."`.
pub fn clean_join(parts: &[&str]) -> String {
    let mut absolute = false;
    let mut started = false;
    let mut segments: Vec<&str> = Vec::new();

    for part in parts {
        if part.is_empty() {
            continue;
        }
        if !started {
            absolute = part.starts_with('/');
            started = true;
        }
        for seg in part.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    if segments.last().is_some_and(|s| *s != "..") {
                        segments.pop();
                    } else if !absolute {
                        segments.push("..");
                    }
                }
                s => segments.push(s),
            }
        }
    }

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Derive the catalog identifier of a logical location.
///
/// The id is the hex md5 digest of the cleaned `backend_name/root/path` join,
/// so the same location always yields the same id and the backend name keeps
/// identical paths on different backends apart.
pub fn derive_id(backend_name: &str, root: &str, path: &str) -> String {
    let key = clean_join(&[backend_name, root, path]);
    format!("{:x}", md5::compute(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_join() {
        assert_eq!(clean_join(&["default", "/lib", "a/b.stl"]), "default/lib/a/b.stl");
        assert_eq!(clean_join(&["/lib", "./a//b/", "."]), "/lib/a/b");
        assert_eq!(clean_join(&["", "", ""]), ".");
        assert_eq!(clean_join(&["a", "../.."]), "..");
        assert_eq!(clean_join(&["/", ".."]), "/");
    }

    #[test]
    fn test_derive_id_is_stable() {
        let a = derive_id("default", "/lib", "a/b.stl");
        let b = derive_id("default", "/lib", "a/b.stl");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_derive_id_separates_backends() {
        let local = derive_id("default", "/lib", "a/b.stl");
        let git = derive_id("gitrepo", "/lib", "a/b.stl");
        assert_ne!(local, git);
    }

    #[test]
    fn test_root_path_variants_agree() {
        assert_eq!(derive_id("default", "/lib", "."), derive_id("default", "/lib", ""));
    }
}
