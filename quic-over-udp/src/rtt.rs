//! Round-trip time estimation and retransmission timeout.
//!
//! RTO follows Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! clamped to `[min_rto, max_rto]`.  Data that has already been retransmitted
//! `n` times waits `RTO × backoffⁿ` (capped) before being declared lost again.

use std::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    backoff: u32,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Duration,
}

impl RttEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            initial_rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            backoff: config.rto_backoff,
            srtt: None,
            rttvar: Duration::ZERO,
        }
    }

    /// Record a new RTT sample and update SRTT / RTTVAR (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn on_sample(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = self.rttvar * 3 / 4 + diff / 4;
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
        }
    }

    /// Current RTO; `initial_rto` until the first sample arrives.
    pub fn rto(&self) -> Duration {
        let rto = match self.srtt {
            Some(srtt) => srtt + self.rttvar * 4,
            None => self.initial_rto,
        };
        rto.clamp(self.min_rto, self.max_rto)
    }

    /// RTO for data already retransmitted `attempt` times.
    pub fn backed_off(&self, attempt: u32) -> Duration {
        let factor = self.backoff.saturating_pow(attempt);
        self.rto().saturating_mul(factor).min(self.max_rto)
    }

    pub fn smoothed(&self) -> Option<Duration> {
        self.srtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn estimator() -> RttEstimator {
        RttEstimator::new(&Config {
            initial_rto: ms(300),
            min_rto: ms(50),
            max_rto: ms(4000),
            rto_backoff: 2,
            ..Config::default()
        })
    }

    #[test]
    fn initial_rto_before_any_sample() {
        assert_eq!(estimator().rto(), ms(300));
    }

    #[test]
    fn first_sample_sets_srtt_and_half_variance() {
        let mut rtt = estimator();
        rtt.on_sample(ms(100));
        assert_eq!(rtt.smoothed(), Some(ms(100)));
        // 100 + 4 × 50
        assert_eq!(rtt.rto(), ms(300));
    }

    #[test]
    fn subsequent_samples_are_smoothed() {
        let mut rtt = estimator();
        rtt.on_sample(ms(100));
        rtt.on_sample(ms(200));
        // RTTVAR = 3/4·50 + 1/4·100 = 62.5, SRTT = 7/8·100 + 1/8·200 = 112.5
        assert_eq!(rtt.smoothed(), Some(Duration::from_micros(112_500)));
        assert_eq!(rtt.rto(), Duration::from_micros(362_500));
    }

    #[test]
    fn rto_never_drops_below_floor() {
        let mut rtt = estimator();
        rtt.on_sample(Duration::from_micros(200));
        assert_eq!(rtt.rto(), ms(50));
    }

    #[test]
    fn backoff_doubles_per_attempt_and_caps() {
        let rtt = estimator();
        assert_eq!(rtt.backed_off(0), ms(300));
        assert_eq!(rtt.backed_off(1), ms(600));
        assert_eq!(rtt.backed_off(3), ms(2400));
        assert_eq!(rtt.backed_off(10), ms(4000));
    }
}
