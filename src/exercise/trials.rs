//! Paced multi-trial exchange
//!
//! An optional preamble line (e.g. a duration) is sent once, then each
//! trial sends a fixed group of lines, optionally followed by the trial
//! index, and reads a fixed number of replies.

use crate::error::Result;
use crate::serial::{LinePort, Reply, SerialLineChannel};
use log::info;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct TrialPlan {
    pub preamble: Option<String>,
    pub lines: Vec<String>,
    /// Send the zero-based trial index after `lines`
    pub append_index: bool,
    pub replies_per_trial: usize,
    pub trials: usize,
    /// Pause between trials (not after the last one)
    pub pause: Duration,
}

impl Default for TrialPlan {
    fn default() -> Self {
        Self {
            preamble: Some("5".to_string()),
            lines: vec!["23".to_string(), "34".to_string()],
            append_index: true,
            replies_per_trial: 2,
            trials: 10,
            pause: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub index: usize,
    pub replies: Vec<Reply>,
}

impl TrialRecord {
    pub fn complete(&self) -> bool {
        self.replies.iter().all(|r| !r.is_timed_out())
    }
}

/// Run every trial in `plan`, invoking `on_trial` as each one finishes
pub fn run_trials<P, F>(
    channel: &mut SerialLineChannel<P>,
    plan: &TrialPlan,
    mut on_trial: F,
) -> Result<Vec<TrialRecord>>
where
    P: LinePort,
    F: FnMut(&TrialRecord),
{
    if let Some(preamble) = &plan.preamble {
        channel.send_line(preamble)?;
    }

    let mut records = Vec::with_capacity(plan.trials);
    for index in 0..plan.trials {
        for line in &plan.lines {
            channel.send_line(line)?;
        }
        if plan.append_index {
            channel.send_line(&index.to_string())?;
        }

        let mut replies = Vec::with_capacity(plan.replies_per_trial);
        for _ in 0..plan.replies_per_trial {
            replies.push(channel.receive_line()?);
        }

        let record = TrialRecord { index, replies };
        on_trial(&record);
        records.push(record);

        if index + 1 < plan.trials && !plan.pause.is_zero() {
            thread::sleep(plan.pause);
        }
    }

    let complete = records.iter().filter(|r| r.complete()).count();
    info!("{}/{} trials received every reply", complete, records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockPort;

    #[test]
    fn test_trials_follow_plan() {
        // Sketch acknowledges every third value of a trial with two lines
        let mut seen = 0;
        let port = MockPort::with_responder(move |line| {
            seen += 1;
            if seen > 1 && (seen - 1) % 3 == 0 {
                vec![format!("got {}", line), "done".to_string()]
            } else {
                Vec::new()
            }
        });
        let handle = port.clone();
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_millis(100));

        let plan = TrialPlan {
            trials: 3,
            pause: Duration::ZERO,
            ..Default::default()
        };
        let mut reported = Vec::new();
        let records = run_trials(&mut ch, &plan, |r| reported.push(r.index)).unwrap();

        assert_eq!(reported, vec![0, 1, 2]);
        assert!(records.iter().all(TrialRecord::complete));
        assert_eq!(records[2].replies[0], Reply::Line("got 2".to_string()));
        assert_eq!(
            handle.written_lines(),
            vec!["5", "23", "34", "0", "23", "34", "1", "23", "34", "2"]
        );
    }

    #[test]
    fn test_missing_replies_are_recorded() {
        let port = MockPort::new();
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_millis(10));

        let plan = TrialPlan {
            preamble: None,
            lines: vec!["1".to_string()],
            append_index: false,
            replies_per_trial: 1,
            trials: 2,
            pause: Duration::ZERO,
        };
        let records = run_trials(&mut ch, &plan, |_| {}).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.complete()));
    }
}
