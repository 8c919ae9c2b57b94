//! cache key derivation.
//!
//! a key is `host + path[?query] + "_" + digest`. the digest covers the raw
//! body when there is one, otherwise a canonical form of the request headers
//! plus the path. header names are sorted so insertion order never changes the
//! digest; repeated values under one name keep their order. volatile headers
//! such as cookies are hashed as-is and will split the cache.

use http::HeaderMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub fn derive_key(
    host: &str,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> String {
    let target = match query {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_owned(),
    };

    let digest = if body.is_empty() {
        header_digest(headers, &target)
    } else {
        hex::encode(Sha256::digest(body))
    };

    format!("{}{}_{}", host, target, digest)
}

/// values are hashed as raw bytes; obs-text that is not utf-8 still counts.
/// every field is length-prefixed so no two header sets share an encoding.
fn header_digest(headers: &HeaderMap, target: &str) -> String {
    let mut canonical: BTreeMap<&str, Vec<&[u8]>> = BTreeMap::new();
    for (name, value) in headers {
        canonical
            .entry(name.as_str())
            .or_default()
            .push(value.as_bytes());
    }

    let mut hasher = Sha256::new();
    hasher.update((canonical.len() as u64).to_be_bytes());
    for (name, values) in &canonical {
        update_field(&mut hasher, name.as_bytes());
        hasher.update((values.len() as u64).to_be_bytes());
        for value in values {
            update_field(&mut hasher, value);
        }
    }
    update_field(&mut hasher, target.as_bytes());
    hex::encode(hasher.finalize())
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn same_inputs_give_same_key() {
        let h = headers(&[("accept", "*/*"), ("user-agent", "chrome")]);
        let a = derive_key("example.com", "/a", Some("x=1"), &h, b"");
        let b = derive_key("example.com", "/a", Some("x=1"), &h, b"");
        assert_eq!(a, b);
        assert!(a.starts_with("example.com/a?x=1_"));
    }

    #[test]
    fn header_insertion_order_is_irrelevant() {
        let first = headers(&[("accept", "*/*"), ("user-agent", "chrome"), ("x-a", "1")]);
        let second = headers(&[("x-a", "1"), ("user-agent", "chrome"), ("accept", "*/*")]);
        assert_eq!(
            derive_key("h", "/", None, &first, b""),
            derive_key("h", "/", None, &second, b"")
        );
    }

    #[test]
    fn differing_headers_change_empty_body_key() {
        let a = headers(&[("cookie", "session=1")]);
        let b = headers(&[("cookie", "session=2")]);
        assert_ne!(
            derive_key("h", "/", None, &a, b""),
            derive_key("h", "/", None, &b, b"")
        );
    }

    #[test]
    fn body_replaces_headers_in_digest() {
        let a = headers(&[("cookie", "session=1")]);
        let b = headers(&[("cookie", "session=2")]);
        assert_eq!(
            derive_key("h", "/api", None, &a, b"{\"q\":1}"),
            derive_key("h", "/api", None, &b, b"{\"q\":1}")
        );
    }

    #[test]
    fn differing_bodies_give_different_keys() {
        let h = headers(&[("content-type", "application/json")]);
        assert_ne!(
            derive_key("h", "/api", None, &h, b"{\"q\":1}"),
            derive_key("h", "/api", None, &h, b"{\"q\":2}")
        );
    }

    #[test]
    fn body_digest_is_plain_sha256() {
        let key = derive_key("h", "/p", None, &HeaderMap::new(), b"abc");
        assert_eq!(
            key,
            "h/p_ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn non_utf8_header_values_stay_distinct() {
        let mut a = HeaderMap::new();
        a.insert("x-token", HeaderValue::from_bytes(b"\xe9").unwrap());
        let mut b = HeaderMap::new();
        b.insert("x-token", HeaderValue::from_bytes(b"\xe8").unwrap());
        assert_ne!(
            derive_key("h", "/", None, &a, b""),
            derive_key("h", "/", None, &b, b"")
        );
    }

    #[test]
    fn value_boundaries_are_part_of_the_digest() {
        let split = headers(&[("x-a", "1"), ("x-a", "2")]);
        let joined = headers(&[("x-a", "12")]);
        assert_ne!(
            derive_key("h", "/", None, &split, b""),
            derive_key("h", "/", None, &joined, b"")
        );
    }

    #[test]
    fn repeated_header_value_order_matters() {
        let a = headers(&[("accept", "a"), ("accept", "b")]);
        let b = headers(&[("accept", "b"), ("accept", "a")]);
        assert_ne!(
            derive_key("h", "/", None, &a, b""),
            derive_key("h", "/", None, &b, b"")
        );
    }
}
