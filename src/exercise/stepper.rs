//! Operator console for the stepper motor sketches
//!
//! Two sketch families exist: positioning (move N steps, or home to the
//! hall-effect sensor on an empty line) and full rotation (`f`/`b`).
//! Both quit on `q`, which is forwarded to the sketch before leaving.

use super::ExerciseError;
use crate::serial::{LinePort, Reply, SerialLineChannel};
use log::debug;
use std::fmt;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperMode {
    /// Step counts and homing; the sketch answers every command
    Position,
    /// Full forward/backward turns; the sketch does not answer
    Rotation,
}

impl StepperMode {
    pub fn instructions(&self) -> &'static str {
        match self {
            StepperMode::Position => {
                "Enter an integer number of steps to move, press enter to move stepper to hall effect sensor, or q to quit."
            }
            StepperMode::Rotation => {
                "Enter f to rotate stepper full turn forward, enter b to rotate stepper full turn backwards, or press q to quit."
            }
        }
    }

    fn expects_reply(&self) -> bool {
        matches!(self, StepperMode::Position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperCommand {
    Steps(i64),
    Home,
    Forward,
    Backward,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInput {
    pub mode: StepperMode,
    pub input: String,
}

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid input {:?}. {}", self.input, self.mode.instructions())
    }
}

impl StepperCommand {
    /// Validate one line of operator input for `mode`
    pub fn parse(mode: StepperMode, input: &str) -> Result<Self, InvalidInput> {
        let trimmed = input.trim();
        let invalid = || InvalidInput {
            mode,
            input: trimmed.to_string(),
        };

        if trimmed == "q" {
            return Ok(StepperCommand::Quit);
        }
        match mode {
            StepperMode::Position if trimmed.is_empty() => Ok(StepperCommand::Home),
            StepperMode::Position => trimmed
                .parse::<i64>()
                .map(StepperCommand::Steps)
                .map_err(|_| invalid()),
            StepperMode::Rotation => match trimmed {
                "f" => Ok(StepperCommand::Forward),
                "b" => Ok(StepperCommand::Backward),
                _ => Err(invalid()),
            },
        }
    }

    /// Line sent to the sketch
    pub fn payload(&self) -> String {
        match self {
            StepperCommand::Steps(n) => n.to_string(),
            StepperCommand::Home => String::new(),
            StepperCommand::Forward => "f".to_string(),
            StepperCommand::Backward => "b".to_string(),
            StepperCommand::Quit => "q".to_string(),
        }
    }
}

/// Counters for a console session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepperSession {
    pub sent: usize,
    pub rejected: usize,
    pub timeouts: usize,
    /// The operator asked to quit (rather than closing input)
    pub quit: bool,
}

/// Prompt on `output`, read commands from `input`, forward them to the sketch.
///
/// In position mode each command's reply is printed and leftover input
/// from the sketch is discarded before the next prompt.
pub fn run_stepper_console<P, R, W>(
    channel: &mut SerialLineChannel<P>,
    mode: StepperMode,
    mut input: R,
    mut output: W,
) -> Result<StepperSession, ExerciseError>
where
    P: LinePort,
    R: BufRead,
    W: Write,
{
    let mut session = StepperSession::default();
    writeln!(output, "\n{}\n", mode.instructions())?;

    loop {
        write!(output, "Enter input: ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            debug!("Operator input closed");
            break;
        }
        if channel.is_cancelled() {
            debug!("Console cancelled");
            break;
        }

        let command = match StepperCommand::parse(mode, &line) {
            Ok(command) => command,
            Err(invalid) => {
                session.rejected += 1;
                writeln!(output, "\n{}\n", invalid)?;
                continue;
            }
        };

        channel.send_line(&command.payload())?;
        session.sent += 1;

        if mode.expects_reply() {
            match channel.receive_line()? {
                Reply::Line(reply) => writeln!(output, "{}", reply)?,
                Reply::TimedOut => {
                    session.timeouts += 1;
                    writeln!(output, "(no reply)")?;
                }
            }
            channel.clear_input()?;
        }

        if command == StepperCommand::Quit {
            session.quit = true;
            break;
        }
    }

    writeln!(output, "Quitting program.")?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockPort;
    use std::io::Cursor;
    use std::time::Duration;

    #[test]
    fn test_parse_position_commands() {
        let mode = StepperMode::Position;
        assert_eq!(StepperCommand::parse(mode, "200\n"), Ok(StepperCommand::Steps(200)));
        assert_eq!(StepperCommand::parse(mode, "-50"), Ok(StepperCommand::Steps(-50)));
        assert_eq!(StepperCommand::parse(mode, "\n"), Ok(StepperCommand::Home));
        assert_eq!(StepperCommand::parse(mode, "q\n"), Ok(StepperCommand::Quit));
        assert!(StepperCommand::parse(mode, "f").is_err());
        assert!(StepperCommand::parse(mode, "1.5").is_err());
    }

    #[test]
    fn test_parse_rotation_commands() {
        let mode = StepperMode::Rotation;
        assert_eq!(StepperCommand::parse(mode, "f"), Ok(StepperCommand::Forward));
        assert_eq!(StepperCommand::parse(mode, "b\n"), Ok(StepperCommand::Backward));
        assert_eq!(StepperCommand::parse(mode, "q"), Ok(StepperCommand::Quit));
        assert!(StepperCommand::parse(mode, "").is_err());
        assert!(StepperCommand::parse(mode, "100").is_err());
    }

    #[test]
    fn test_position_console_session() {
        let port = MockPort::with_responder(|line| vec![format!("moved {}", line)]);
        let handle = port.clone();
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_millis(200));

        let input = Cursor::new("100\nabc\n\nq\n");
        let mut output = Vec::new();
        let session =
            run_stepper_console(&mut ch, StepperMode::Position, input, &mut output).unwrap();

        assert_eq!(session.sent, 3);
        assert_eq!(session.rejected, 1);
        assert!(session.quit);
        assert_eq!(handle.written_lines(), vec!["100", "", "q"]);
        assert_eq!(handle.discards(), 3);

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("moved 100"));
        assert!(text.contains("Invalid input \"abc\""));
        assert!(text.ends_with("Quitting program.\n"));
    }

    #[test]
    fn test_rotation_console_does_not_wait_for_replies() {
        let port = MockPort::new();
        let handle = port.clone();
        let mut ch = SerialLineChannel::from_port("mock", port, Duration::from_secs(5));

        let session = run_stepper_console(
            &mut ch,
            StepperMode::Rotation,
            Cursor::new("f\nb\n"),
            Vec::new(),
        )
        .unwrap();

        assert_eq!(session.sent, 2);
        assert!(!session.quit);
        assert_eq!(handle.written_lines(), vec!["f", "b"]);
    }
}
