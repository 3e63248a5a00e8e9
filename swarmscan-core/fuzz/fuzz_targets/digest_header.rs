#![no_main]
use libfuzzer_sys::fuzz_target;
use std::path::Path;
use swarmscan_core::{Digest, ScanContainer, UrlKeys};

fuzz_target!(|data: &[u8]| {
    // Whatever loads must honour its own header
    if let Ok(digest) = Digest::from_bytes(data, Path::new("fuzz")) {
        assert!(digest.len() <= digest.capacity());
        let _ = digest.lookup(&UrlKeys::new("http://fuzz/", None));
    }
});
