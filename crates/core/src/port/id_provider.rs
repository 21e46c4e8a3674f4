// ID Provider Port (for deterministic run ids in tests)

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::application::constants::RUN_SUFFIX_LEN;

/// Source of the random suffix embedded in run ids
pub trait IdProvider: Send + Sync {
    fn generate_id(&self) -> String;
}

/// Upper-case alphanumeric suffix (production)
pub struct RandomSuffixProvider;

impl IdProvider for RandomSuffixProvider {
    fn generate_id(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RUN_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect()
    }
}

pub mod mocks {
    use super::*;

    pub struct FixedIdProvider(pub String);

    impl IdProvider for FixedIdProvider {
        fn generate_id(&self) -> String {
            self.0.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_suffix_shape() {
        let id = RandomSuffixProvider.generate_id();
        assert_eq!(id.len(), RUN_SUFFIX_LEN);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
