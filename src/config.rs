//! Engine configuration.

/// Configuration of the [`Osnma`](crate::Osnma) engine.
///
/// All durations are counted in 30-second subframes of data time.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Config {
    /// Subframes after the key slot during which a pending tag can still be
    /// verified.
    pub disclosure_deadline_subframes: i32,
    /// Maximum number of applications of the one-way function to validate
    /// a key.
    pub max_derivations: usize,
    /// Authentication bits needed for navigation data to be returned as
    /// authenticated.
    pub min_authbits: u16,
    /// Subframes during which keys, navigation data and verdicts are kept.
    pub retention_subframes: i32,
    /// Whether Slow MAC (ADKD 12) tags are processed.
    pub slow_mac: bool,
}

impl Config {
    /// Reduced profile for memory-constrained receivers.
    ///
    /// Only the last few subframes are retained and Slow MAC is disabled,
    /// since its key arrives 11 subframes after the tag.
    pub fn small() -> Config {
        Config {
            retention_subframes: 3,
            slow_mac: false,
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            disclosure_deadline_subframes: 2,
            max_derivations: 3000,
            min_authbits: 40,
            retention_subframes: 13,
            slow_mac: true,
        }
    }
}
