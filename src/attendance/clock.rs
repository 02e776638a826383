//! Trusted time.
//!
//! Lateness and overtime are penalties, so they are computed against a
//! reference clock rather than whatever the host clock says. [`TimeSource`]
//! keeps the offset between the two and applies it to every reading; when the
//! reference is unreachable it keeps the last good offset, or the raw local
//! clock if it never had one.

use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TimeSyncError {
    #[error("time service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("time service answered without a usable instant: {0}")]
    BadPayload(String),
}

/// The host clock.
pub trait LocalClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl LocalClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// An external time authority.
#[async_trait]
pub trait TrustedClock: Send + Sync {
    async fn fetch_trusted_instant(&self, timezone: &str) -> Result<DateTime<Utc>, TimeSyncError>;
}

/// WorldTimeAPI-compatible endpoint: `GET {base}/timezone/{tz}`.
pub struct WorldTimeApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct WorldTimeResponse {
    datetime: Option<String>,
    unixtime: Option<i64>,
}

impl WorldTimeApi {
    pub fn new(base_url: impl Into<String>, timeout: StdDuration) -> Result<Self, TimeSyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TrustedClock for WorldTimeApi {
    async fn fetch_trusted_instant(&self, timezone: &str) -> Result<DateTime<Utc>, TimeSyncError> {
        let url = format!("{}/timezone/{}", self.base_url, timezone);
        let body: WorldTimeResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(raw) = body.datetime.as_deref() {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Ok(parsed.with_timezone(&Utc));
            }
        }
        body.unixtime
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| TimeSyncError::BadPayload(format!("{:?}", body.datetime)))
    }
}

#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    offset: Duration,
    synced_at: DateTime<Utc>,
}

/// Corrected "now" shared by every time-sensitive computation.
pub struct TimeSource {
    local: Arc<dyn LocalClock>,
    trusted: Arc<dyn TrustedClock>,
    timezone: String,
    last_sync: RwLock<Option<SyncPoint>>,
}

impl TimeSource {
    pub fn new(local: Arc<dyn LocalClock>, trusted: Arc<dyn TrustedClock>, timezone: impl Into<String>) -> Self {
        Self {
            local,
            trusted,
            timezone: timezone.into(),
            last_sync: RwLock::new(None),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let local = self.local.now();
        match self.sync_point() {
            Some(point) => local + point.offset,
            None => local,
        }
    }

    /// Offset applied by `now()`, if a sync ever succeeded.
    pub fn offset(&self) -> Option<Duration> {
        self.sync_point().map(|point| point.offset)
    }

    /// Refreshes the offset. Failures are logged and leave the previous
    /// offset in place; returns whether the sync succeeded.
    pub async fn sync(&self) -> bool {
        match self.trusted.fetch_trusted_instant(&self.timezone).await {
            Ok(trusted) => {
                let local = self.local.now();
                let offset = trusted - local;
                if let Ok(mut guard) = self.last_sync.write() {
                    *guard = Some(SyncPoint {
                        offset,
                        synced_at: local,
                    });
                }
                info!(offset_ms = offset.num_milliseconds(), "Time synchronized with server");
                true
            }
            Err(e) => {
                warn!(error = %e, "Error syncing time with server");
                false
            }
        }
    }

    /// Re-syncs when the offset is older than `max_age` or missing.
    pub async fn resync_if_stale(&self, max_age: Duration) -> bool {
        let stale = match self.sync_point() {
            Some(point) => self.local.now() - point.synced_at > max_age,
            None => true,
        };
        if stale {
            debug!("Time offset is stale, resyncing");
            return self.sync().await;
        }
        false
    }

    fn sync_point(&self) -> Option<SyncPoint> {
        // A poisoned lock still holds a valid offset.
        match self.last_sync.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Periodic background sync, stopped through its cancellation token.
pub struct ResyncTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ResyncTask {
    pub fn spawn(time: Arc<TimeSource>, every: StdDuration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Time resync loop cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        time.sync().await;
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Time resync task ended abnormally");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Host clock under test control.
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub fn new(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(start),
            })
        }

        pub fn set(&self, instant: DateTime<Utc>) {
            *self.now.lock().unwrap() = instant;
        }

        pub fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl LocalClock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    /// Reference clock that is `skew` ahead of a local clock, or unreachable.
    pub struct ScriptedTrustedClock {
        local: Arc<dyn LocalClock>,
        skew: Mutex<Option<Duration>>,
        calls: Mutex<usize>,
    }

    impl ScriptedTrustedClock {
        pub fn ahead_of(local: Arc<dyn LocalClock>, skew: Duration) -> Arc<Self> {
            Arc::new(Self {
                local,
                skew: Mutex::new(Some(skew)),
                calls: Mutex::new(0),
            })
        }

        pub fn unreachable(local: Arc<dyn LocalClock>) -> Arc<Self> {
            Arc::new(Self {
                local,
                skew: Mutex::new(None),
                calls: Mutex::new(0),
            })
        }

        pub fn set_skew(&self, skew: Option<Duration>) {
            *self.skew.lock().unwrap() = skew;
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TrustedClock for ScriptedTrustedClock {
        async fn fetch_trusted_instant(&self, _timezone: &str) -> Result<DateTime<Utc>, TimeSyncError> {
            *self.calls.lock().unwrap() += 1;
            let skew = *self.skew.lock().unwrap();
            match skew {
                Some(skew) => Ok(self.local.now() + skew),
                None => Err(TimeSyncError::BadPayload("unreachable".into())),
            }
        }
    }

    /// Uncorrected time source over a manual clock.
    pub fn manual_time(start: DateTime<Utc>) -> (Arc<ManualClock>, Arc<TimeSource>) {
        let clock = ManualClock::new(start);
        let trusted = ScriptedTrustedClock::unreachable(clock.clone());
        let time = Arc::new(TimeSource::new(clock.clone(), trusted, "UTC"));
        (clock, time)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn unsynced_source_reads_the_local_clock() {
        let (clock, time) = manual_time(start());
        assert_eq!(time.now(), start());
        clock.advance(Duration::seconds(5));
        assert_eq!(time.now(), start() + Duration::seconds(5));
        assert!(time.offset().is_none());
    }

    #[tokio::test]
    async fn sync_applies_measured_offset() {
        let clock = ManualClock::new(start());
        let trusted = ScriptedTrustedClock::ahead_of(clock.clone(), Duration::seconds(90));
        let time = TimeSource::new(clock.clone(), trusted, "America/New_York");

        assert!(time.sync().await);
        assert_eq!(time.offset(), Some(Duration::seconds(90)));
        assert_eq!(time.now() - clock.now(), Duration::seconds(90));
    }

    #[tokio::test]
    async fn failed_sync_keeps_last_good_offset() {
        let clock = ManualClock::new(start());
        let trusted = ScriptedTrustedClock::ahead_of(clock.clone(), Duration::seconds(-30));
        let time = TimeSource::new(clock.clone(), trusted.clone(), "UTC");
        assert!(time.sync().await);

        trusted.set_skew(None);
        assert!(!time.sync().await);
        assert_eq!(time.offset(), Some(Duration::seconds(-30)));
        assert_eq!(time.now(), clock.now() - Duration::seconds(30));
    }

    #[tokio::test]
    async fn failed_first_sync_falls_back_to_local_time() {
        let clock = ManualClock::new(start());
        let trusted = ScriptedTrustedClock::unreachable(clock.clone());
        let time = TimeSource::new(clock.clone(), trusted, "UTC");
        assert!(!time.sync().await);
        assert_eq!(time.now(), clock.now());
    }

    #[tokio::test]
    async fn resync_only_when_stale() {
        let clock = ManualClock::new(start());
        let trusted = ScriptedTrustedClock::ahead_of(clock.clone(), Duration::seconds(2));
        let time = TimeSource::new(clock.clone(), trusted.clone(), "UTC");

        assert!(time.resync_if_stale(Duration::hours(1)).await);
        clock.advance(Duration::minutes(30));
        assert!(!time.resync_if_stale(Duration::hours(1)).await);
        assert_eq!(trusted.calls(), 1);

        clock.advance(Duration::minutes(31));
        assert!(time.resync_if_stale(Duration::hours(1)).await);
        assert_eq!(trusted.calls(), 2);
    }
}
