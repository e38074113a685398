//! Per-session byte token bucket for data-channel throttling.
//!
//! One bucket lives inside each session (not shared across sessions);
//! every RETR/STOR/APPE chunk is accounted through [`TokenBucket::consume`]
//! before it is written to or read from the data socket.

use tokio::time::{Duration, Instant};

/// Token-bucket rate limiter. `rate_bytes_per_sec == 0` disables limiting
/// entirely (every `consume` call returns immediately).
pub struct TokenBucket {
    rate: u64,
    burst: u64,
    tokens: u64,
    last_refill: Option<Instant>,
}

impl TokenBucket {
    /// Build a bucket with the given rate (bytes/sec) and burst capacity.
    /// `burst` defaults to `rate` when zero and `rate` is non-zero.
    pub fn new(rate_bytes_per_sec: u64, burst_bytes: u64) -> Self {
        let burst = if burst_bytes == 0 { rate_bytes_per_sec } else { burst_bytes };
        Self { rate: rate_bytes_per_sec, burst, tokens: 0, last_refill: None }
    }

    /// A bucket with rate limiting disabled.
    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    fn refill(&mut self, now: Instant) {
        match self.last_refill {
            None => {
                self.tokens = self.burst;
                self.last_refill = Some(now);
            }
            Some(last) => {
                let elapsed_ns = now.saturating_duration_since(last).as_nanos() as u64;
                let gained = elapsed_ns.saturating_mul(self.rate) / 1_000_000_000;
                self.tokens = (self.tokens + gained).min(self.burst);
                self.last_refill = Some(now);
            }
        }
    }

    /// Block (via `tokio::time::sleep`) until `n` bytes are available,
    /// then account for them. A no-op when rate limiting is disabled.
    pub async fn consume(&mut self, n: u64) {
        if self.rate == 0 {
            return;
        }
        loop {
            let now = Instant::now();
            self.refill(now);
            if self.tokens >= n {
                self.tokens -= n;
                return;
            }
            let deficit = n - self.tokens;
            let wait_ns = deficit.saturating_mul(1_000_000_000) / self.rate.max(1);
            let wait = Duration::from_nanos(wait_ns).min(Duration::from_millis(500));
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_bucket_never_sleeps() {
        let mut bucket = TokenBucket::unlimited();
        let start = Instant::now();
        bucket.consume(10_000_000).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn bucket_allows_burst_immediately() {
        let mut bucket = TokenBucket::new(1000, 500);
        let start = Instant::now();
        bucket.consume(500).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn bucket_throttles_beyond_burst() {
        let mut bucket = TokenBucket::new(1_000_000, 100);
        let start = Instant::now();
        bucket.consume(100).await;
        bucket.consume(200_000).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
