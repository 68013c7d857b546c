use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide source of unique, filename-safe test case names.
pub struct NameGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            counter: AtomicU64::new(0),
            prefix: prefix.into(),
        }
    }

    pub fn next_name(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}_{id:08}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_filename_safe() {
        let generator = NameGenerator::new("tc");
        let a = generator.next_name();
        let b = generator.next_name();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
