#![no_main]
use libfuzzer_sys::fuzz_target;
use std::path::Path;
use swarmscan_core::{ScanContainer, ScanLog, UrlKeys};

fuzz_target!(|data: &[u8]| {
    if let Ok(log) = ScanLog::from_bytes(data, Path::new("fuzz.log")) {
        let _ = log.lookup(&UrlKeys::new("http://fuzz/", None));
        let _ = log.siginfo();
    }
});
