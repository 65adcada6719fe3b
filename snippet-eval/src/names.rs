// Type-name heuristics
//
// Remote type names use '$' to separate nested types, with a trailing
// numeric segment denoting an anonymous class. This is a heuristic over
// name mangling, not a guaranteed demangling scheme: anonymous types are
// excluded from capture rather than rejected, and exotic synthetic names
// pass through untouched.

/// Source-level rendition of a remote type name: nested separators become
/// dots; `None` when the name denotes an anonymous class (trailing numeric
/// segment), whose locals a snippet cannot reference.
pub fn translated_type_name(type_name: &str) -> Option<String> {
    let Some(index) = type_name.rfind('$') else {
        return Some(type_name.to_string());
    };
    let last = &type_name[index + 1..];
    if !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(type_name.replace('$', "."))
}

/// Whether the name denotes a top-level type.
pub fn is_top_level(type_name: &str) -> bool {
    !type_name.contains('$')
}

/// The enclosing top-level type of a possibly nested name.
pub fn outermost_type(type_name: &str) -> &str {
    match type_name.find('$') {
        Some(index) => &type_name[..index],
        None => type_name,
    }
}

/// Project-relative source path for a type.
///
/// With a debug attribute present, the path is the type's package directory
/// plus the attribute's file name; otherwise the file name is guessed from
/// the outermost type name.
pub fn source_path(type_name: &str, source_name: Option<&str>) -> String {
    match source_name {
        Some(source_name) => {
            let package = match type_name.rfind('.') {
                Some(index) => &type_name[..index],
                None => "",
            };
            if package.is_empty() {
                source_name.to_string()
            } else {
                format!("{}/{}", package.replace('.', "/"), source_name)
            }
        }
        None => format!("{}.java", outermost_type(type_name).replace('.', "/")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_passes_through() {
        assert_eq!(translated_type_name("a.b.C"), Some("a.b.C".to_string()));
    }

    #[test]
    fn test_nested_name_translated() {
        assert_eq!(translated_type_name("a.b.C$D"), Some("a.b.C.D".to_string()));
        assert_eq!(
            translated_type_name("a.b.C$D$E"),
            Some("a.b.C.D.E".to_string())
        );
    }

    #[test]
    fn test_anonymous_name_excluded() {
        assert_eq!(translated_type_name("a.b.C$1"), None);
        assert_eq!(translated_type_name("a.b.C$D$2"), None);
    }

    #[test]
    fn test_dollar_with_letters_is_nested_not_anonymous() {
        assert_eq!(
            translated_type_name("a.b.C$1Local"),
            Some("a.b.C.1Local".to_string())
        );
    }

    #[test]
    fn test_top_level() {
        assert!(is_top_level("p.q.T"));
        assert!(!is_top_level("p.q.T$U"));
    }

    #[test]
    fn test_source_path_from_name() {
        assert_eq!(source_path("p.q.T", None), "p/q/T.java");
        assert_eq!(source_path("p.q.T$U", None), "p/q/T.java");
        assert_eq!(source_path("T", None), "T.java");
    }

    #[test]
    fn test_source_path_from_debug_attribute() {
        assert_eq!(source_path("p.q.T", Some("T.java")), "p/q/T.java");
        assert_eq!(source_path("T", Some("T.java")), "T.java");
    }
}
