//! Round-trip throughput test

use crate::error::{ChannelError, Result};
use crate::serial::{LinePort, Reply, SerialLineChannel};
use log::info;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedReport {
    /// Replies received, matching or not
    pub round_trips: usize,
    pub timeouts: usize,
    /// Replies that differed from the payload
    pub mismatches: usize,
    pub elapsed: Duration,
    pub mean_round_trip: Option<Duration>,
    pub cancelled: bool,
}

impl SpeedReport {
    pub fn lines_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.round_trips as f64 / secs
        }
    }
}

/// Send `payload` and read its echo repeatedly until `duration` has passed
pub fn speed_test<P: LinePort>(
    channel: &mut SerialLineChannel<P>,
    payload: &str,
    duration: Duration,
) -> Result<SpeedReport> {
    let mut report = SpeedReport::default();
    let mut total_rtt = Duration::ZERO;
    let start = Instant::now();

    while start.elapsed() < duration {
        let sent_at = Instant::now();
        let reply = match channel.exchange(payload) {
            Ok(reply) => reply,
            Err(ChannelError::Cancelled) => {
                report.cancelled = true;
                break;
            }
            Err(e) => return Err(e),
        };

        match reply {
            Reply::Line(line) => {
                report.round_trips += 1;
                total_rtt += sent_at.elapsed();
                if line != payload {
                    report.mismatches += 1;
                }
            }
            Reply::TimedOut => report.timeouts += 1,
        }
    }

    report.elapsed = start.elapsed();
    report.mean_round_trip = mean_duration(total_rtt, report.round_trips);
    info!(
        "Speed test: {} round trips, {} timeouts in {:.2}s",
        report.round_trips,
        report.timeouts,
        report.elapsed.as_secs_f64()
    );
    Ok(report)
}

fn mean_duration(total: Duration, count: usize) -> Option<Duration> {
    (count > 0).then(|| total.div_f64(count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{CancelToken, MockPort};

    #[test]
    fn test_echoing_peer() {
        let port = MockPort::echoing();
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_millis(100));

        let report = speed_test(&mut ch, "hi", Duration::from_millis(50)).unwrap();
        assert!(report.round_trips > 0);
        assert_eq!(report.timeouts, 0);
        assert_eq!(report.mismatches, 0);
        assert!(report.mean_round_trip.is_some());
        assert!(report.lines_per_second() > 0.0);
    }

    #[test]
    fn test_mismatched_and_missing_replies() {
        let mut count = 0;
        let port = MockPort::with_responder(move |_| {
            count += 1;
            if count % 2 == 0 {
                Vec::new()
            } else {
                vec!["garbled".to_string()]
            }
        });
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_millis(10));

        let report = speed_test(&mut ch, "hi", Duration::from_millis(60)).unwrap();
        assert_eq!(report.mismatches, report.round_trips);
        assert!(report.timeouts > 0);
    }

    #[test]
    fn test_cancel_stops_early() {
        let port = MockPort::new();
        let token = CancelToken::new();
        token.cancel();
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_secs(1))
            .with_cancel_token(token);

        let report = speed_test(&mut ch, "hi", Duration::from_secs(10)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.round_trips, 0);
        assert!(report.elapsed < Duration::from_secs(1));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_mean_duration_beyond_u32_count() {
        assert_eq!(mean_duration(Duration::from_secs(1), 0), None);
        let mean = mean_duration(Duration::from_millis(30), 4).unwrap();
        assert_eq!(mean, Duration::from_micros(7500));

        let count = (u32::MAX as u64 + 2) as usize;
        let mean = mean_duration(Duration::from_secs(count as u64), count).unwrap();
        assert!((mean.as_secs_f64() - 1.0).abs() < 1e-6, "mean {:?}", mean);
    }
}
