//! Default values for configuration

/// Default number of links per sitemap chunk
pub fn default_chunk_size() -> usize {
    1000
}

/// Default number of resources synchronized per rebuild step
pub fn default_batch_limit() -> usize {
    100
}

/// Default base URL prefixed to every generated location
pub fn default_base_url() -> String {
    std::env::var("SITEMAPPER_BASE_URL").unwrap_or_else(|_| "http://localhost".to_string())
}

/// Default lastmod format (W3C datetime, UTC)
pub fn default_lastmod_format() -> String {
    "%Y-%m-%dT%H:%M:%SZ".to_string()
}

/// Default: prefetch URL aliases per language
pub fn default_prefetch_aliases() -> bool {
    true
}

/// Default: substitute URL aliases for internal paths
pub fn default_resolve_aliases() -> bool {
    true
}

/// Default language for links and sitemaps without one
pub fn default_language() -> String {
    crate::LANGUAGE_NONE.to_string()
}

/// Default number of elements written between writer flushes
pub fn default_flush_every() -> usize {
    500
}

/// Default: do not write gzip copies
pub fn default_gzip() -> bool {
    false
}

/// Default minimum seconds between automatic regenerations
pub fn default_minimum_lifetime() -> i64 {
    0
}

/// Default memory floor (32 MiB)
pub fn default_memory_floor() -> u64 {
    32 * 1024 * 1024
}

/// Default per-link memory estimate in bytes
pub fn default_per_link_bytes() -> u64 {
    500
}

/// Default per-alias memory estimate in bytes
pub fn default_per_alias_bytes() -> u64 {
    250
}

/// Default: links of a type are included
pub fn default_link_type_status() -> bool {
    true
}

/// Default link priority
pub fn default_link_type_priority() -> f64 {
    crate::DEFAULT_PRIORITY
}

/// Default: aliases are not required for inclusion
pub fn default_require_alias() -> bool {
    false
}
