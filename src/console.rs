//! Operator console over a byte-oriented serial port.
//!
//! The diagnostic protocol is plain human-readable text. Input is only ever
//! used as a gate: a prompt consumes and discards bytes until a line
//! terminator arrives, without validating content.

use core::fmt;

use embedded_io::{Read, Write};

pub struct Console<P> {
    port: P,
}

impl<P> Console<P>
where
    P: Read + Write,
{
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Writes `msg` as its own line, then blocks until the operator sends
    /// `\n` or `\r`. Everything before the terminator is discarded.
    pub fn prompt(&mut self, msg: &str) {
        self.line(format_args!("{msg}"));
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                // A real UART never reports end-of-stream; a fake port does
                // once its script runs out.
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == b'\n' || byte[0] == b'\r' {
                        break;
                    }
                }
                // RX noise (framing, overrun) does not end the wait.
                Err(_) => {}
            }
        }
    }

    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        self.text(args);
        self.bytes(b"\r\n");
    }

    pub fn text(&mut self, args: fmt::Arguments<'_>) {
        let _ = fmt::Write::write_fmt(&mut Sink(&mut self.port), args);
    }

    pub fn blank(&mut self) {
        self.bytes(b"\r\n");
    }

    /// Raw byte echo, used while streaming file contents.
    pub fn bytes(&mut self, data: &[u8]) {
        let _ = self.port.write_all(data);
        let _ = self.port.flush();
    }
}

#[cfg(test)]
impl Console<testport::ScriptPort> {
    pub(crate) fn output(&self) -> &heapless::Vec<u8, 8192> {
        &self.port.output
    }

    pub(crate) fn remaining_input(&self) -> &[u8] {
        self.port.remaining_input()
    }
}

struct Sink<'a, P>(&'a mut P);

impl<P: Write> fmt::Write for Sink<'_, P> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_all(s.as_bytes()).map_err(|_| fmt::Error)
    }
}
