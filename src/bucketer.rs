//! Deterministic bucketing.
//!
//! Outputs must be identical on every platform running a Featurevisor SDK, so the hash function,
//! seed, and key format are fixed.
use std::io::Cursor;

use crate::{
    datafile::{BucketBy, Feature},
    Context,
};

/// Bucket values are in `0..MAX_BUCKETED_NUMBER`. Percentages and ranges use the same scale.
pub const MAX_BUCKETED_NUMBER: u32 = 100_000;

/// Default separator between bucket key components.
pub const DEFAULT_BUCKET_KEY_SEPARATOR: &str = ".";

const HASH_SEED: u32 = 1;
const MAX_HASH_VALUE: f64 = 4_294_967_296.0; // 2^32

/// Map `bucket_key` to a stable number in `0..MAX_BUCKETED_NUMBER` using MurmurHash3 x86 32-bit
/// over the UTF-8 bytes of the key.
pub fn resolve_number(bucket_key: &str) -> u32 {
    let hash = murmur3::murmur3_32(&mut Cursor::new(bucket_key.as_bytes()), HASH_SEED)
        .expect("reading from an in-memory buffer should not fail");
    let ratio = f64::from(hash) / MAX_HASH_VALUE;
    (ratio * f64::from(MAX_BUCKETED_NUMBER)).floor() as u32
}

/// Build the bucket key of `feature` for `context`: values of the `bucketBy` attributes followed by
/// the feature key, joined with `separator`.
pub fn build_bucket_key(feature: &Feature, context: &Context, separator: &str) -> String {
    let mut parts: Vec<String> = match &feature.bucket_by {
        BucketBy::Single(attribute) => context
            .get(attribute)
            .map(|value| value.to_bucket_string())
            .into_iter()
            .collect(),
        BucketBy::And(attributes) => attributes
            .iter()
            .filter_map(|attribute| context.get(attribute))
            .map(|value| value.to_bucket_string())
            .collect(),
        BucketBy::Or { or } => or
            .iter()
            .find_map(|attribute| context.get(attribute))
            .map(|value| value.to_bucket_string())
            .into_iter()
            .collect(),
    };

    parts.push(feature.key.clone());
    parts.join(separator)
}
