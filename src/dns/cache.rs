//! a threadsafe, time-windowed cache of resolved addresses

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Local};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub clears: u64,
}

/// Memo table from hostname to address. The table is dropped as a whole once
/// `refresh` has elapsed since the last clear; there is no per entry expiry.
pub struct Cache {
    entries: HashMap<String, IpAddr>,
    last_clear: DateTime<Local>,
    refresh: Duration,
    hits: u64,
    misses: u64,
    clears: u64,
}

impl Cache {
    pub fn new(refresh: Duration) -> Cache {
        Cache::starting_at(refresh, Local::now())
    }

    pub fn starting_at(refresh: Duration, now: DateTime<Local>) -> Cache {
        Cache {
            entries: HashMap::new(),
            last_clear: now,
            refresh,
            hits: 0,
            misses: 0,
            clears: 0,
        }
    }

    /// Looks up `hostname` as of `now`, clearing the table first if the
    /// window has run out.
    pub fn lookup_at(&mut self, hostname: &str, now: DateTime<Local>) -> Option<IpAddr> {
        self.expire(now);

        match self.entries.get(hostname) {
            Some(addr) => {
                self.hits = self.hits.saturating_add(1);
                Some(*addr)
            }
            None => {
                self.misses = self.misses.saturating_add(1);
                None
            }
        }
    }

    pub fn store_at(&mut self, hostname: &str, addr: IpAddr, now: DateTime<Local>) {
        self.expire(now);
        self.entries.insert(hostname.to_string(), addr);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            clears: self.clears,
        }
    }

    fn expire(&mut self, now: DateTime<Local>) {
        if now - self.last_clear < self.refresh {
            return;
        }

        debug!(entries = self.entries.len(), "resolution window elapsed, clearing cache");
        self.entries.clear();
        self.last_clear = now;
        self.clears = self.clears.saturating_add(1);
    }
}

pub struct SynchronizedCache {
    pub cache: RwLock<Cache>,
}

impl SynchronizedCache {
    pub fn new(refresh: Duration) -> SynchronizedCache {
        SynchronizedCache {
            cache: RwLock::new(Cache::new(refresh)),
        }
    }

    pub fn lookup(&self, hostname: &str) -> Option<IpAddr> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);

        cache.lookup_at(hostname, Local::now())
    }

    pub fn store(&self, hostname: &str, addr: IpAddr) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);

        cache.store_at(hostname, addr, Local::now());
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);

        cache.stats()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_cache() {
        let start = Local::now();
        let mut cache = Cache::starting_at(Duration::seconds(300), start);

        let google = "127.0.0.1".parse::<IpAddr>().unwrap();
        let yahoo = "::2".parse::<IpAddr>().unwrap();
        cache.store_at("www.google.com", google, start);
        cache.store_at("www.yahoo.com", yahoo, start + Duration::seconds(10));

        // Test for successful lookup
        assert_eq!(Some(google), cache.lookup_at("www.google.com", start + Duration::seconds(1)));
        assert_eq!(Some(yahoo), cache.lookup_at("www.yahoo.com", start + Duration::seconds(299)));

        // Test for failed lookup, since nothing is known about this domain
        assert_eq!(None, cache.lookup_at("www.microsoft.com", start + Duration::seconds(2)));

        assert_eq!(
            CacheStats {
                entries: 2,
                hits: 2,
                misses: 1,
                clears: 0
            },
            cache.stats()
        );
    }

    #[test]
    fn test_window_clears_whole_table() {
        let start = Local::now();
        let mut cache = Cache::starting_at(Duration::seconds(300), start);

        let addr = "10.0.0.1".parse::<IpAddr>().unwrap();
        cache.store_at("early.example", addr, start);
        // Stored late in the window, but still dropped together with the rest
        cache.store_at("late.example", addr, start + Duration::seconds(290));

        assert_eq!(None, cache.lookup_at("late.example", start + Duration::seconds(300)));
        assert_eq!(None, cache.lookup_at("early.example", start + Duration::seconds(301)));
        assert_eq!(1, cache.stats().clears);
        assert_eq!(0, cache.stats().entries);

        // The next window starts at the clear
        cache.store_at("early.example", addr, start + Duration::seconds(302));
        assert_eq!(Some(addr), cache.lookup_at("early.example", start + Duration::seconds(599)));
        assert_eq!(None, cache.lookup_at("early.example", start + Duration::seconds(600)));
        assert_eq!(2, cache.stats().clears);
    }

    #[test]
    fn test_synchronized_cache() {
        let cache = SynchronizedCache::new(Duration::seconds(300));
        let addr = "192.0.2.1".parse::<IpAddr>().unwrap();

        assert_eq!(None, cache.lookup("example.com"));
        cache.store("example.com", addr);
        assert_eq!(Some(addr), cache.lookup("example.com"));

        let stats = cache.stats();
        assert_eq!(1, stats.hits);
        assert_eq!(1, stats.misses);
        assert_eq!(1, stats.entries);
    }

    #[test]
    fn test_counters_saturate() {
        let start = Local::now();
        let mut cache = Cache::starting_at(Duration::seconds(0), start);
        cache.hits = u64::MAX;
        cache.misses = u64::MAX;
        cache.clears = u64::MAX;

        let addr = "10.0.0.1".parse::<IpAddr>().unwrap();
        cache.store_at("example.com", addr, start);
        assert_eq!(None, cache.lookup_at("example.com", start));
        assert_eq!(u64::MAX, cache.stats().misses);
        assert_eq!(u64::MAX, cache.stats().clears);

        let mut cache = Cache::starting_at(Duration::seconds(300), start);
        cache.hits = u64::MAX;
        cache.store_at("example.com", addr, start);
        assert_eq!(Some(addr), cache.lookup_at("example.com", start));

        assert_eq!(u64::MAX, cache.stats().hits);
    }
}
