//! Nickname selection.

use rand::Rng;
use rand::seq::SliceRandom;

use parley_core::ChatConfig;

/// The configured nickname, or adjective + noun + a number below 100.
///
/// Falls back to `"Anonymous"` plus the number if a word list is empty,
/// which [`ChatConfig::validate`] otherwise prevents.
pub fn pick<R: Rng>(config: &ChatConfig, rng: &mut R) -> String {
    if let Some(name) = config.default_nickname.as_deref().filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    let number = rng.gen_range(0..100);
    match (
        config.default_adjectives.choose(rng),
        config.default_nouns.choose(rng),
    ) {
        (Some(adjective), Some(noun)) => format!("{adjective}{noun}{number}"),
        _ => format!("Anonymous{number}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_configured_nickname_wins() {
        let config = ChatConfig {
            default_nickname: Some("Alice".to_string()),
            ..ChatConfig::default()
        };
        assert_eq!(pick(&config, &mut StdRng::seed_from_u64(1)), "Alice");
    }

    #[test]
    fn test_generated_nickname_shape() {
        let config = ChatConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let name = pick(&config, &mut rng);
            let adjective = config
                .default_adjectives
                .iter()
                .find(|a| name.starts_with(a.as_str()))
                .unwrap();
            let rest = &name[adjective.len()..];
            let noun = config
                .default_nouns
                .iter()
                .find(|n| rest.starts_with(n.as_str()))
                .unwrap();
            let number: u32 = rest[noun.len()..].parse().unwrap();
            assert!(number < 100);
        }
    }

    #[test]
    fn test_empty_lists_fall_back() {
        let config = ChatConfig {
            default_adjectives: Vec::new(),
            ..ChatConfig::default()
        };
        assert!(pick(&config, &mut StdRng::seed_from_u64(3)).starts_with("Anonymous"));
    }
}
