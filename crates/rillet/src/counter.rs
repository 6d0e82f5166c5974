use std::time::Instant;

/// Exponential Moving Average (EMA) smoothing factor
/// Higher values = more responsive to changes, lower values = smoother
const EMA_ALPHA: f64 = 0.3;

/// Counter of the download rate.
///
/// Owned by the torrent coordinator, which is the only writer, so the state
/// is plain fields instead of atomics.
#[derive(Debug)]
pub struct Counter {
    pub total_downloaded: u64,

    /// Smoothed rate in bytes per second.
    pub download_rate: u64,

    window_downloaded: u64,
    last_update: Instant,
    ema_download: f64,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            total_downloaded: 0,
            download_rate: 0,
            window_downloaded: 0,
            last_update: Instant::now(),
            ema_download: 0.0,
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record downloaded bytes
    pub fn record_download(&mut self, bytes: u64) {
        self.total_downloaded += bytes;
        self.window_downloaded += bytes;
    }

    /// Update the rate with EMA smoothing
    pub fn update_rates(&mut self) {
        self.update_rates_at(Instant::now());
    }

    fn update_rates_at(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Minimum 1ms elapsed
        if elapsed < 0.001 {
            return;
        }

        let downloaded = std::mem::take(&mut self.window_downloaded);
        let dl_rate = downloaded as f64 / elapsed;

        self.ema_download = if self.ema_download == 0.0 {
            dl_rate
        } else {
            EMA_ALPHA * dl_rate + (1.0 - EMA_ALPHA) * self.ema_download
        };

        self.download_rate = self.ema_download as u64;
        self.last_update = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counter_rates() {
        let mut counter = Counter::new();
        let start = counter.last_update;

        // first window sets the EMA to the instantaneous rate
        counter.record_download(1000);
        counter.update_rates_at(start + Duration::from_millis(100));
        assert!((9_999..=10_001).contains(&counter.download_rate));

        // same data, the rate is stable
        counter.record_download(1000);
        counter.update_rates_at(start + Duration::from_millis(200));
        assert!((9_999..=10_001).contains(&counter.download_rate));

        // double the data: 0.3 * 20_000 + 0.7 * 10_000
        counter.record_download(2000);
        counter.update_rates_at(start + Duration::from_millis(300));
        assert!((12_999..=13_001).contains(&counter.download_rate));

        assert_eq!(counter.total_downloaded, 4000);
    }

    #[test]
    fn too_soon_is_ignored() {
        let mut counter = Counter::new();
        let start = counter.last_update;

        counter.record_download(1000);
        counter.update_rates_at(start);

        assert_eq!(counter.download_rate, 0);
        assert_eq!(counter.total_downloaded, 1000);
    }
}
