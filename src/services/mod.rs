//! Supporting services

mod scan_cache;

pub use scan_cache::{
    image_hash, image_hash_bytes, DetectedFood, ScanCache, ScanResult, HASH_PREFIX_LEN,
};
