use bounty_watch::{normalize, normalize_all};

#[test]
fn strips_scheme_wildcard_port_and_path() {
    assert_eq!(normalize("https://*.Example.com:8080/path").as_deref(), Some("Example.com"));
    assert_eq!(normalize("http://shop.example.com/").as_deref(), Some("shop.example.com"));
    assert_eq!(normalize("  api.example.com  ").as_deref(), Some("api.example.com"));
}

#[test]
fn rejects_entries_with_nothing_left() {
    for raw in ["", "   ", "https://", "*.", "http:///path", ":443"] {
        assert_eq!(normalize(raw), None, "{raw:?}");
    }
}

#[test]
fn normalizing_twice_changes_nothing() {
    let samples = [
        "https://*.Example.com:8080/path",
        "*.*.nested.example.com",
        " *. spaced.example.com",
        "http://a.b.c:1/x/y?z",
        "weird entry",
        "https://user@host.example.com",
    ];
    for raw in samples {
        if let Some(once) = normalize(raw) {
            assert_eq!(normalize(&once).as_deref(), Some(once.as_str()), "{raw:?}");
        }
    }
}

#[test]
fn scope_lists_collapse_to_unique_domains() {
    let scope = ["*.acme.com", "https://acme.com/login", "acme.com:443", "", "api.acme.com", "API.acme.com"];
    assert_eq!(normalize_all(scope), vec!["acme.com", "api.acme.com", "API.acme.com"]);
}
