//! License identifiers: `BBX-XXXX-<unixtime>`

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

pub const LICENSE_ID_PREFIX: &str = "BBX";

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const RANDOM_PART_LEN: usize = 4;

fn license_id_pattern() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^BBX-[A-Z0-9]{4}-\d+$").expect("license id pattern compiles"))
}

/// Generate a license id stamped with `issued_at`
pub fn generate_license_id<R: Rng + ?Sized>(rng: &mut R, issued_at: &DateTime<Utc>) -> String {
    let random: String = (0..RANDOM_PART_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}-{}-{}", LICENSE_ID_PREFIX, random, issued_at.timestamp())
}

/// Format check only; existence is checked by the issuer
pub fn is_well_formed(license_id: &str) -> bool {
    license_id_pattern().is_match(license_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_ids_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(7);
        let issued = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        for _ in 0..100 {
            let id = generate_license_id(&mut rng, &issued);
            assert!(is_well_formed(&id), "{}", id);
            assert!(id.ends_with(&format!("-{}", issued.timestamp())));
        }
    }

    #[test]
    fn test_format_check() {
        assert!(is_well_formed("BBX-A1B2-1717200000"));
        assert!(!is_well_formed("BBX-a1b2-1717200000"));
        assert!(!is_well_formed("BBX-A1B-1717200000"));
        assert!(!is_well_formed("XYZ-A1B2-1717200000"));
        assert!(!is_well_formed("BBX-A1B2-"));
        assert!(!is_well_formed("BBX-A1B2-17x"));
        assert!(!is_well_formed(" BBX-A1B2-1717200000"));
    }
}
