//! Synchronous request/response loop over line-delimited JSON.
//!
//! One command in, one or more response lines out, fully drained before the
//! next line is read. All four sidecars share this loop; they differ only in
//! the [`CommandHandler`] plugged into it.

use std::io::{BufRead, Write};

use tracing::{debug, error};

use crate::error::LateralError;
use crate::server::protocol::{decode_command, encode_response, Command, Response};

/// Writes response lines to the parent.
///
/// Every response is one JSON line followed by a flush; the parent reads the
/// pipe line-by-line and must never wait on buffered output.
pub struct ResponseWriter<W: Write> {
    out: W,
}

impl<W: Write> ResponseWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write(&mut self, response: &Response) -> Result<(), LateralError> {
        let line = encode_response(response);
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// One sidecar's command dispatch.
///
/// Streaming handlers write their intermediate lines through the writer and
/// return the terminal response; the loop writes that last line itself.
pub trait CommandHandler {
    fn handle<W: Write>(
        &mut self,
        command: Command,
        writer: &mut ResponseWriter<W>,
    ) -> Result<Response, LateralError>;
}

/// Run the sidecar loop until stdin closes.
///
/// Error containment: a malformed line or failed handler produces one
/// `Error` response and the loop continues. Only a write failure toward the
/// parent (broken pipe) or EOF ends the loop; both are a normal exit.
pub fn run<H, R, W>(handler: &mut H, input: R, output: W) -> Result<(), LateralError>
where
    H: CommandHandler,
    R: BufRead,
    W: Write,
{
    let mut writer = ResponseWriter::new(output);
    let mut lines = input.lines();
    loop {
        let line = match lines.next() {
            None => break,
            Some(Ok(line)) => line,
            Some(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => break,
            Some(Err(e)) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match decode_command(&line) {
            Ok(command) => {
                debug!(?command, "dispatching command");
                match handler.handle(command, &mut writer) {
                    Ok(response) => response,
                    Err(e) => {
                        error!(error = %e, "command failed");
                        Response::error(e.to_string())
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "rejected input line");
                Response::error(e.to_string())
            }
        };
        writer.write(&response)?;
    }
    debug!("stdin closed, exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct PingOnly;

    impl CommandHandler for PingOnly {
        fn handle<W: Write>(
            &mut self,
            command: Command,
            _writer: &mut ResponseWriter<W>,
        ) -> Result<Response, LateralError> {
            match command {
                Command::Ping => Ok(Response::pong()),
                _ => Err(LateralError::backend("unsupported")),
            }
        }
    }

    fn run_lines(input: &str) -> Vec<serde_json::Value> {
        let mut handler = PingOnly;
        let mut out = Vec::new();
        run(&mut handler, Cursor::new(input.to_string()), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_ping_round_trip() {
        let lines = run_lines("{\"command\": \"ping\"}\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["success"], true);
        assert_eq!(lines[0]["message"], "pong");
    }

    #[test]
    fn test_eof_without_input_exits_cleanly() {
        let lines = run_lines("");
        assert!(lines.is_empty());
    }

    #[test]
    fn test_malformed_line_recovers() {
        let lines = run_lines("not json at all\n{\"command\": \"ping\"}\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["success"], false);
        assert!(lines[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON:"));
        assert_eq!(lines[1]["message"], "pong");
    }

    #[test]
    fn test_handler_error_becomes_error_line() {
        let lines = run_lines("{\"command\": \"status\"}\n{\"command\": \"ping\"}\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["success"], false);
        assert_eq!(lines[0]["error"], "unsupported");
        assert_eq!(lines[1]["message"], "pong");
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let lines = run_lines("\n   \n{\"command\": \"ping\"}\n");
        assert_eq!(lines.len(), 1);
    }

    /// Yields one command line, then fails every further read with
    /// `Interrupted`.
    struct InterruptedAfterOneLine {
        served: bool,
    }

    impl std::io::Read for InterruptedAfterOneLine {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::Interrupted.into())
        }
    }

    impl BufRead for InterruptedAfterOneLine {
        fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
            Err(std::io::ErrorKind::Interrupted.into())
        }

        fn consume(&mut self, _amt: usize) {}

        fn read_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
            if self.served {
                return Err(std::io::ErrorKind::Interrupted.into());
            }
            self.served = true;
            buf.push_str("{\"command\": \"ping\"}\n");
            Ok(buf.len())
        }
    }

    #[test]
    fn test_interrupted_read_exits_like_eof() {
        let mut handler = PingOnly;
        let mut out = Vec::new();
        let result = run(
            &mut handler,
            InterruptedAfterOneLine { served: false },
            &mut out,
        );
        assert!(result.is_ok());
        // the line served before the interruption was answered
        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["message"], "pong");
    }

    #[test]
    fn test_every_line_is_parseable_json() {
        let raw = {
            let mut handler = PingOnly;
            let mut out = Vec::new();
            run(
                &mut handler,
                Cursor::new("{\"command\":\"ping\"}\ngarbage\n".to_string()),
                &mut out,
            )
            .unwrap();
            String::from_utf8(out).unwrap()
        };
        for line in raw.lines() {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }
}
