//! Import scanning for generated source.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^import[ \t]+([A-Za-z_]\w*)").unwrap());
static FROM_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^from[ \t]+([A-Za-z_]\w*)(?:\.\w+)*[ \t]+import\b").unwrap()
});

/// Return the top-level package names referenced by unindented `import X` and
/// `from X[.y] import ...` lines.
///
/// Relative imports (`from . import x`) are ignored.
pub fn scan_imports(code: &str) -> BTreeSet<String> {
    let mut packages = BTreeSet::new();
    for re in [&*IMPORT_RE, &*FROM_IMPORT_RE] {
        for caps in re.captures_iter(code) {
            if let Some(name) = caps.get(1) {
                packages.insert(name.as_str().to_string());
            }
        }
    }
    packages
}

/// Drop names that refer to modules living in the sandbox itself.
pub fn external_only(
    packages: BTreeSet<String>,
    local_modules: &BTreeSet<String>,
) -> BTreeSet<String> {
    packages
        .into_iter()
        .filter(|name| !local_modules.contains(name))
        .collect()
}
