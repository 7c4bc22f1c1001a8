use rand::Rng;

/// `<prefix><last 6 digits of the unix millis><3 random digits>`, e.g. `PICK482913057`.
pub fn generate_pickup_code(prefix: &str, now_millis: i64) -> String {
    let stamp = now_millis.rem_euclid(1_000_000);
    let random = rand::rng().random_range(0u32..1000);
    format!("{prefix}{stamp:06}{random:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_has_prefix_and_nine_digits() {
        let code = generate_pickup_code("PICK", 1_700_000_123_456);
        assert!(code.starts_with("PICK123456"));
        assert_eq!(code.len(), 13);
        assert!(code[4..].chars().all(|c| c.is_ascii_digit()));
    }
}
