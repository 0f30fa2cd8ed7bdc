pub mod canonical;

pub use canonical::to_canonical_json;

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs_f64()
}

///
/// The `sha256_hex` function performs a SHA-256 hash operation on the provided
/// data input and returns the digest as a lowercase hex string.
///
/// # Arguments
///
/// * `data` - A reference to the input data.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    HEXLOWER.encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_hex_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn current_timestamp_is_recent() {
        let now = current_timestamp();
        assert!(now > 1_600_000_000.0);
    }
}
