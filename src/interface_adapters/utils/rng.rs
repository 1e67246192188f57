use rand::Rng;

/// Largest id a JSON number carries without precision loss.
pub const MAX_JSON_SAFE_ID: u64 = (1 << 53) - 1;

/// Random non-zero id for connections and guest players. Kept inside the
/// JSON-safe integer range since clients echo player ids back as numbers.
pub fn rand_id() -> u64 {
    rand::thread_rng().gen_range(1..=MAX_JSON_SAFE_ID)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_non_zero_and_json_safe() {
        for _ in 0..1000 {
            let id = rand_id();
            assert!(id > 0);
            assert!(id <= MAX_JSON_SAFE_ID);
            assert_eq!(id as f64 as u64, id);
        }
    }
}
