//! Bootstrap credentials for freshly deployed servers.

use rand::Rng;

/// Symbols a generated password is drawn from. Visually ambiguous letters
/// (D, I, L, O, Q, T, i, l, o) are left out.
const ALPHABET: &[u8] =
    br#"ABCEFGHJKMNPRSUVWXYZabcdefghjkmnpqrstuvwxyz0123456789#@()=+/{}[],.?;':|-_!$%^&*~`"#;

pub const MIN_SUPPLIED_LEN: usize = 8;
const GENERATED_LEN_MIN: usize = 17;
const GENERATED_LEN_MAX: usize = 24;

/// Generate a password of 17 to 24 symbols.
pub fn generate_password<R: Rng>(rng: &mut R) -> String {
    let len = rng.random_range(GENERATED_LEN_MIN..=GENERATED_LEN_MAX);
    (0..len)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

/// Keep a supplied credential of at least eight characters, otherwise
/// generate one.
pub fn bootstrap_password<R: Rng>(supplied: Option<&str>, rng: &mut R) -> String {
    match supplied {
        Some(p) if p.chars().count() >= MIN_SUPPLIED_LEN => p.to_string(),
        _ => generate_password(rng),
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn generated_passwords_use_the_alphabet_and_length_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let pw = generate_password(&mut rng);
            assert!((GENERATED_LEN_MIN..=GENERATED_LEN_MAX).contains(&pw.len()), "{pw}");
            assert!(pw.bytes().all(|b| ALPHABET.contains(&b)), "{pw}");
        }
    }

    #[test]
    fn same_seed_same_password() {
        let a = generate_password(&mut StdRng::seed_from_u64(42));
        let b = generate_password(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn short_or_missing_credentials_are_replaced() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(bootstrap_password(Some("s3cret-pass"), &mut rng), "s3cret-pass");

        let replaced = bootstrap_password(Some("short"), &mut rng);
        assert_ne!(replaced, "short");
        assert!(replaced.len() >= GENERATED_LEN_MIN);

        assert!(bootstrap_password(None, &mut rng).len() >= GENERATED_LEN_MIN);
    }
}
