//! Consumed-challenge tracking for replay protection.
//!
//! Challenges are issued statelessly (sealed into the `opaque` parameter); only consumption is
//! recorded here. Entries sit in time buckets keyed by the challenge's issuance time, and old
//! buckets are overwritten as time advances, so there is no sweeper task.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │ Bucket 0 │ Bucket 1 │ Bucket 2 │ Bucket 3 │
//! └──────────┴──────────┴──────────┴──────────┘
//!      ↑ rotates as time advances
//! ```
//!
//! Each bucket spans half the challenge TTL, so the window is twice the TTL: anything old enough
//! to have rotated out is already rejected as expired.

use std::collections::HashSet;

use parking_lot::Mutex;
use time::Duration;

const BUCKET_COUNT: usize = 4;

/// Why a challenge could not be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// The challenge has already been claimed.
    #[error("challenge already used")]
    Replayed,

    /// The challenge is older than the tracking window.
    #[error("challenge outside the tracking window")]
    Expired,
}

/// Cache of recently consumed challenges.
#[derive(Debug)]
pub struct ChallengeCache {
    inner: Mutex<Inner>,
    bucket_millis: i64,
}

#[derive(Debug)]
struct Inner {
    buckets: [HashSet<Vec<u8>>; BUCKET_COUNT],

    /// Bucket number of the oldest live bucket.
    head: i64,
}

impl ChallengeCache {
    /// Create a cache for challenges that live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buckets: Default::default(),
                head: 0,
            }),
            bucket_millis: (i64::try_from(ttl.whole_milliseconds()).unwrap_or(i64::MAX) / 2)
                .max(1),
        }
    }

    /// Atomically check that `challenge` is unused and mark it used.
    ///
    /// `issued_at` is the challenge's issuance time in unix milliseconds.
    pub fn try_claim(&self, challenge: &[u8], issued_at: i64) -> Result<(), ClaimError> {
        let bucket = issued_at.div_euclid(self.bucket_millis);
        let mut inner = self.inner.lock();

        if bucket < inner.head {
            return Err(ClaimError::Expired);
        }
        inner.advance(bucket);

        if inner.buckets.iter().any(|b| b.contains(challenge)) {
            return Err(ClaimError::Replayed);
        }

        inner.buckets[bucket.rem_euclid(BUCKET_COUNT as i64) as usize].insert(challenge.to_vec());
        Ok(())
    }

    /// Number of challenges currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().buckets.iter().map(HashSet::len).sum()
    }
}

impl Inner {
    fn advance(&mut self, bucket: i64) {
        let newest = self.head + BUCKET_COUNT as i64 - 1;
        if bucket <= newest {
            return;
        }

        let new_head = bucket - (BUCKET_COUNT as i64 - 1);
        if new_head - self.head >= BUCKET_COUNT as i64 {
            self.buckets.iter_mut().for_each(HashSet::clear);
        } else {
            for n in self.head..new_head {
                self.buckets[n.rem_euclid(BUCKET_COUNT as i64) as usize].clear();
            }
        }
        self.head = new_head;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    const TTL: Duration = Duration::minutes(5);
    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn claims_once() {
        let cache = ChallengeCache::new(TTL);
        assert_eq!(cache.try_claim(b"one", T0), Ok(()));
        assert_eq!(cache.try_claim(b"one", T0), Err(ClaimError::Replayed));
        assert_eq!(cache.try_claim(b"two", T0), Ok(()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn replay_detected_across_buckets() {
        let cache = ChallengeCache::new(TTL);
        cache.try_claim(b"one", T0).unwrap();
        let later = T0 + TTL.whole_milliseconds() as i64;
        cache.try_claim(b"two", later).unwrap();
        assert_eq!(cache.try_claim(b"one", T0), Err(ClaimError::Replayed));
    }

    #[test]
    fn old_buckets_rotate_out() {
        let cache = ChallengeCache::new(TTL);
        cache.try_claim(b"one", T0).unwrap();
        let much_later = T0 + 10 * TTL.whole_milliseconds() as i64;
        cache.try_claim(b"two", much_later).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.try_claim(b"one", T0), Err(ClaimError::Expired));
    }

    #[test]
    fn concurrent_claims_succeed_exactly_once() {
        let cache = Arc::new(ChallengeCache::new(TTL));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.try_claim(b"contested", T0).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
