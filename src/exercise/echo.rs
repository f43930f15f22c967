//! Single send/echo check

use crate::error::Result;
use crate::serial::{LinePort, Reply, SerialLineChannel};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct EchoOutcome {
    pub sent: String,
    pub reply: Reply,
    pub round_trip: Duration,
}

impl EchoOutcome {
    /// True when the reply starts with the payload (sketches may append an acknowledgement)
    pub fn echoed(&self) -> bool {
        self.reply
            .line()
            .is_some_and(|line| line.starts_with(&self.sent))
    }
}

/// Send `payload` once and wait for the reply
pub fn echo<P: LinePort>(channel: &mut SerialLineChannel<P>, payload: &str) -> Result<EchoOutcome> {
    let start = Instant::now();
    let reply = channel.exchange(payload)?;
    Ok(EchoOutcome {
        sent: payload.to_string(),
        reply,
        round_trip: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockPort;

    #[test]
    fn test_echo_with_acknowledgement() {
        let port = MockPort::with_responder(|line| vec![format!("{} polo", line)]);
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_millis(200));

        let outcome = echo(&mut ch, "marco").unwrap();
        assert_eq!(outcome.reply, Reply::Line("marco polo".to_string()));
        assert!(outcome.echoed());
    }

    #[test]
    fn test_silent_peer() {
        let port = MockPort::new();
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_millis(20));

        let outcome = echo(&mut ch, "marco").unwrap();
        assert!(outcome.reply.is_timed_out());
        assert!(!outcome.echoed());
        assert!(outcome.round_trip >= Duration::from_millis(20));
    }
}
