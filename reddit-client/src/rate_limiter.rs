use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    pub fn reddit_oauth() -> Self {
        Self {
            max_requests: 100, // Reddit allows 100 requests per minute for OAuth2
            time_window: Duration::from_secs(60),
            burst_allowance: 10,
        }
    }

    fn refill_rate(&self) -> f64 {
        self.max_requests as f64 / self.time_window.as_secs_f64()
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64, // tokens per second
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst_allowance as f64;
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate: config.refill_rate(),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes `tokens_needed` tokens, or returns how long to wait for them.
    pub async fn acquire(&self, tokens_needed: f64) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= tokens_needed {
            state.tokens -= tokens_needed;
            Ok(())
        } else {
            let missing = tokens_needed - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    /// Empties the bucket so the next request waits a full refill interval.
    pub async fn drain(&self) {
        let mut state = self.state.lock().await;
        state.tokens = 0.0;
        state.last_refill = Instant::now();
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    token_bucket: TokenBucket,
    config: RateLimitConfig,
    window_tracker: Mutex<WindowTracker>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            token_bucket: TokenBucket::new(&config),
            window_tracker: Mutex::new(WindowTracker::new(config.time_window)),
            config,
        }
    }

    pub async fn acquire_permit(&self) -> RateLimitPermit {
        let start_time = Instant::now();

        loop {
            match self.token_bucket.acquire(1.0).await {
                Ok(()) => break,
                Err(wait_time) => {
                    debug!("Rate limit reached, waiting {:?}", wait_time);
                    sleep(wait_time).await;
                }
            }
        }

        self.window_tracker.lock().await.record_request();

        RateLimitPermit {
            queue_wait_time: start_time.elapsed(),
        }
    }

    /// Called when the server answered 429 despite the local budget.
    pub async fn record_rate_limited(&self) {
        warn!("Server-side rate limit hit, draining local token bucket");
        self.token_bucket.drain().await;
        self.window_tracker.lock().await.record_rate_limited();
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        let available_tokens = self.token_bucket.available_tokens().await;
        let window = self.window_tracker.lock().await.current_window_stats();

        let estimated_wait_time = (available_tokens < 1.0).then(|| {
            Duration::from_secs_f64((1.0 - available_tokens) / self.config.refill_rate())
        });

        RateLimitStatus {
            available_tokens: available_tokens as u32,
            max_tokens: self.config.burst_allowance,
            requests_per_minute: self.config.max_requests,
            current_window_requests: window.request_count,
            rate_limited_requests: window.rate_limited_requests,
            estimated_wait_time,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitPermit {
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub requests_per_minute: u32,
    pub current_window_requests: u32,
    pub rate_limited_requests: u32,
    pub estimated_wait_time: Option<Duration>,
}

impl RateLimitStatus {
    pub fn requests_remaining_in_window(&self) -> u32 {
        self.requests_per_minute
            .saturating_sub(self.current_window_requests)
    }
}

#[derive(Debug)]
pub struct WindowTracker {
    window_duration: Duration,
    current_window: WindowStats,
}

#[derive(Debug, Clone)]
pub struct WindowStats {
    pub window_start: Instant,
    pub request_count: u32,
    pub rate_limited_requests: u32,
}

impl WindowStats {
    fn starting_now() -> Self {
        Self {
            window_start: Instant::now(),
            request_count: 0,
            rate_limited_requests: 0,
        }
    }
}

impl WindowTracker {
    pub fn new(window_duration: Duration) -> Self {
        Self {
            window_duration,
            current_window: WindowStats::starting_now(),
        }
    }

    pub fn record_request(&mut self) {
        self.ensure_current_window();
        self.current_window.request_count += 1;
    }

    pub fn record_rate_limited(&mut self) {
        self.ensure_current_window();
        self.current_window.rate_limited_requests += 1;
    }

    pub fn current_window_stats(&self) -> WindowStats {
        self.current_window.clone()
    }

    fn ensure_current_window(&mut self) {
        if self.current_window.window_start.elapsed() >= self.window_duration {
            self.current_window = WindowStats::starting_now();
        }
    }
}
