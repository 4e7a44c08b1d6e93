#![no_main]

use std::collections::HashSet;

use http::Method;
use libfuzzer_sys::fuzz_target;

use httpdisk::cache::CacheKey;
use httpdisk::request::RequestDescriptor;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(url) = text.parse::<http::Uri>() else {
        return;
    };

    let request = RequestDescriptor::new(Method::GET, url);
    let Ok(first) = CacheKey::new(&request, &HashSet::new()) else {
        return;
    };
    // fingerprints are deterministic and shaped as documented
    let second = CacheKey::new(&request, &HashSet::new()).expect("second key");
    assert_eq!(first, second);
    assert_eq!(first.digest().len(), 32);
    assert!(first.digest().chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(first.disk_path().components().count(), 3);
});
