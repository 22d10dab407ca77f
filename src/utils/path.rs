//! URL helpers

/// Last path segment of a URL, ignoring any query string
pub fn url_filename(url: &str) -> Option<&str> {
    let url_path = url.split(['?', '#']).next().unwrap_or(url);
    url_path.rsplit('/').next().filter(|s| !s.is_empty())
}
