//! Fuzz target for manifest decoding and validation.
//!
//! Arbitrary bytes must never panic the parser, the normalizer or the
//! validator, including on dependency cycles.

#![no_main]

use libfuzzer_sys::fuzz_target;
use respack_core::manifest::Manifest;

fuzz_target!(|data: &[u8]| {
    let Ok(mut manifest) = Manifest::from_slice(data) else {
        return;
    };
    manifest.normalize();
    if manifest.validate().is_ok() {
        let _ = manifest.pack_dependencies();
        let _ = manifest.to_json();
    }
});
