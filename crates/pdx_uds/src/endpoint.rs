//! Endpoint name resolution.

use std::path::{
    Path,
    PathBuf,
};

use crate::consts::ROOT_ENDPOINT_PATH;

/// Directory under which relative endpoint names are resolved.
pub fn root_endpoint_path() -> &'static Path {
    Path::new(ROOT_ENDPOINT_PATH)
}

/// Resolves `name` against [root_endpoint_path].
///
/// Absolute names are used verbatim, and an empty name resolves to an empty path that the caller
/// must reject.
pub fn resolve_endpoint_path(name: &str) -> PathBuf {
    resolve_endpoint_path_in(root_endpoint_path(), name)
}

/// Same as [resolve_endpoint_path] but with an explicit namespace root.
pub fn resolve_endpoint_path_in(root: &Path, name: &str) -> PathBuf {
    if name.is_empty() {
        PathBuf::new()
    } else if name.starts_with('/') {
        PathBuf::from(name)
    } else {
        let mut path = root.as_os_str().to_owned();
        path.push("/");
        path.push(name);
        PathBuf::from(path)
    }
}
