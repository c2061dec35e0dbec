use std::collections::HashMap;

use once_cell::sync::Lazy;

/// RFC 7541 Appendix A. Index 0 here is HPACK index 1 (`:authority`); the
/// codec adds 1 when emitting/consuming a static index.
pub(crate) const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// First static index (1-based) carrying a given header name, used when
/// packing a field whose value isn't one of the table's literal values.
pub(crate) static NAME_INDEX: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (i, (name, _)) in STATIC_TABLE.iter().enumerate() {
        map.entry(*name).or_insert(i as u32 + 1);
    }
    map
});

/// Static index (1-based) of an exact name+value pair, when the value is
/// itself one of the table's fixed entries (e.g. `:method: GET`).
pub(crate) static NAME_VALUE_INDEX: Lazy<HashMap<(&'static str, &'static str), u32>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (i, &(name, value)) in STATIC_TABLE.iter().enumerate() {
        if !value.is_empty() {
            map.insert((name, value), i as u32 + 1);
        }
    }
    map
});
