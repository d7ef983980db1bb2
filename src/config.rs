use crate::{Error, DEFAULT_CAPACITY, DEFAULT_LOAD_FACTOR, MAXIMUM_CAPACITY};

/// Construction parameters shared by [`HashMap`](crate::HashMap) and
/// [`LocalHashMap`](crate::LocalHashMap).
///
/// # Examples
///
/// ```
/// use gust::{Config, LocalHashMap};
///
/// let config = Config::default()
///     .initial_capacity(100)
///     .load_factor(0.5);
/// let map: LocalHashMap<u32, u32> = LocalHashMap::with_config(config).unwrap();
/// assert_eq!(map.capacity(), 128);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// The number of bins to start with. Rounded up to the next power of two.
    pub initial_capacity: usize,

    /// The ratio of entries to bins above which the table grows.
    pub load_factor: f32,

    /// Whether the concurrent map's bin locks hand themselves over to the longest waiting
    /// writer on release, rather than letting whichever thread gets there first take them.
    /// Has no effect on [`LocalHashMap`](crate::LocalHashMap).
    pub fair_locks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            fair_locks: false,
        }
    }
}

impl Config {
    /// Sets the number of bins to start with.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the load factor.
    pub fn load_factor(mut self, load_factor: f32) -> Self {
        self.load_factor = load_factor;
        self
    }

    /// Sets whether bin locks are released fairly.
    pub fn fair_locks(mut self, fair: bool) -> Self {
        self.fair_locks = fair;
        self
    }

    /// Checks that the configuration describes a usable table.
    ///
    /// ```
    /// use gust::{Config, Error};
    ///
    /// assert!(Config::default().validate().is_ok());
    /// assert!(matches!(
    ///     Config::default().load_factor(0.0).validate(),
    ///     Err(Error::Validation(_))
    /// ));
    /// ```
    pub fn validate(&self) -> Result<(), Error> {
        if !self.load_factor.is_finite() || self.load_factor <= 0.0 {
            return Err(Error::Validation(format!(
                "load factor must be a positive number, got {}",
                self.load_factor
            )));
        }
        if self.initial_capacity > MAXIMUM_CAPACITY {
            return Err(Error::Validation(format!(
                "initial capacity {} exceeds the maximum of {}",
                self.initial_capacity, MAXIMUM_CAPACITY
            )));
        }
        Ok(())
    }

    /// The table size to start with: the smallest power of two that is at least
    /// `initial_capacity` (and at least one).
    pub(crate) fn table_size(&self) -> usize {
        self.initial_capacity.max(1).next_power_of_two()
    }

    /// The number of entries a table with `capacity` bins may hold before it must grow.
    pub(crate) fn threshold(&self, capacity: usize) -> usize {
        if capacity >= MAXIMUM_CAPACITY {
            return usize::MAX;
        }
        (capacity as f64 * self.load_factor as f64) as usize
    }

    /// The smallest table size whose threshold admits `size` entries.
    pub(crate) fn table_size_for(&self, size: usize) -> usize {
        let mut capacity = self.table_size();
        while capacity < MAXIMUM_CAPACITY && self.threshold(capacity) < size {
            capacity <<= 1;
        }
        capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_size_rounds_up() {
        assert_eq!(Config::default().table_size(), 16);
        assert_eq!(Config::default().initial_capacity(0).table_size(), 1);
        assert_eq!(Config::default().initial_capacity(17).table_size(), 32);
    }

    #[test]
    fn threshold_follows_load_factor() {
        let config = Config::default();
        assert_eq!(config.threshold(16), 12);
        assert_eq!(config.load_factor(1.5).threshold(16), 24);
        assert_eq!(config.threshold(MAXIMUM_CAPACITY), usize::MAX);
    }

    #[test]
    fn table_size_for_admits_size() {
        let config = Config::default();
        assert_eq!(config.table_size_for(0), 16);
        assert_eq!(config.table_size_for(12), 16);
        assert_eq!(config.table_size_for(13), 32);
        assert_eq!(config.table_size_for(100), 256);
    }

    #[test]
    fn rejects_bad_load_factor() {
        for lf in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                Config::default().load_factor(lf).validate(),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn rejects_huge_capacity() {
        let config = Config::default().initial_capacity(MAXIMUM_CAPACITY + 1);
        assert!(config.validate().is_err());
    }
}
