/// A frame produced by [`Framer::next`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A complete command line, CRLF stripped. Blank lines surface as
    /// empty strings; the dispatcher decides whether they mean anything
    /// (they do inside an open AUTH dialogue).
    Line(String),
    /// A run of body bytes, already dot-unstuffed, line endings preserved.
    Data(Vec<u8>),
    /// The `<CR><LF>.<CR><LF>` terminator was seen; command mode resumes.
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Command,
    Data,
}

/// Incremental framer for the SMTP byte stream.
///
/// Bytes go in via [`feed`](Self::feed); complete frames come out via
/// [`next`](Self::next). Only whole lines are ever consumed, so chunk
/// boundaries (including a `.` split across reads) cannot confuse it.
/// Bare LF line endings are tolerated everywhere.
#[derive(Debug)]
pub(crate) struct Framer {
    buf: Vec<u8>,
    mode: Mode,
    pending_ready: bool,
}

impl Framer {
    pub(crate) fn new() -> Self {
        Self {
            buf: Vec::new(),
            mode: Mode::Command,
            pending_ready: false,
        }
    }

    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Switch to data mode. Called by the dispatcher after replying `354`.
    pub(crate) fn start_data(&mut self) {
        self.mode = Mode::Data;
    }

    /// Drop everything buffered and return to command mode. Used when the
    /// stream itself restarts (STARTTLS handshake).
    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.mode = Mode::Command;
        self.pending_ready = false;
    }

    pub(crate) fn next(&mut self) -> Option<Frame> {
        match self.mode {
            Mode::Command => self.next_line(),
            Mode::Data => self.next_data(),
        }
    }

    /// Remove one complete raw line (terminator included) from the buffer.
    fn take_raw_line(&mut self) -> Option<Vec<u8>> {
        let nl = self.buf.iter().position(|&b| b == b'\n')?;
        Some(self.buf.drain(..=nl).collect())
    }

    fn next_line(&mut self) -> Option<Frame> {
        let mut line = self.take_raw_line()?;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Some(Frame::Line(String::from_utf8_lossy(&line).into_owned()))
    }

    fn next_data(&mut self) -> Option<Frame> {
        if self.pending_ready {
            self.pending_ready = false;
            self.mode = Mode::Command;
            return Some(Frame::Ready);
        }

        let mut chunk = Vec::new();

        while let Some(raw) = self.take_raw_line() {
            let ending = if raw.len() >= 2 && raw[raw.len() - 2] == b'\r' {
                2
            } else {
                1
            };
            let content = &raw[..raw.len() - ending];

            if content == b"." {
                if chunk.is_empty() {
                    self.mode = Mode::Command;
                    return Some(Frame::Ready);
                }
                self.pending_ready = true;
                return Some(Frame::Data(chunk));
            }

            // Dot-unstuffing: a body line starting with `.` loses it
            if content.first() == Some(&b'.') {
                chunk.extend_from_slice(&raw[1..]);
            } else {
                chunk.extend_from_slice(&raw);
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(Frame::Data(chunk))
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Frame, Framer};

    #[test]
    fn command_lines() {
        let mut framer = Framer::new();
        framer.feed(b"EHLO client.example\r\nNOOP\r\n");

        assert_eq!(
            framer.next(),
            Some(Frame::Line("EHLO client.example".to_string()))
        );
        assert_eq!(framer.next(), Some(Frame::Line("NOOP".to_string())));
        assert_eq!(framer.next(), None);
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut framer = Framer::new();
        framer.feed(b"QUI");
        assert_eq!(framer.next(), None);
        framer.feed(b"T\r\n");
        assert_eq!(framer.next(), Some(Frame::Line("QUIT".to_string())));
    }

    #[test]
    fn blank_lines_surface_as_empty_strings() {
        let mut framer = Framer::new();
        framer.feed(b"\r\nNOOP\r\n");
        assert_eq!(framer.next(), Some(Frame::Line(String::new())));
        assert_eq!(framer.next(), Some(Frame::Line("NOOP".to_string())));
        assert_eq!(framer.next(), None);
    }

    #[test]
    fn bare_lf_is_tolerated() {
        let mut framer = Framer::new();
        framer.feed(b"HELO host\nQUIT\n");
        assert_eq!(framer.next(), Some(Frame::Line("HELO host".to_string())));
        assert_eq!(framer.next(), Some(Frame::Line("QUIT".to_string())));
    }

    #[test]
    fn data_mode_passes_body_through() {
        let mut framer = Framer::new();
        framer.start_data();
        framer.feed(b"hello\r\nworld\r\n.\r\n");

        assert_eq!(framer.next(), Some(Frame::Data(b"hello\r\nworld\r\n".to_vec())));
        assert_eq!(framer.next(), Some(Frame::Ready));
        assert_eq!(framer.next(), None);
    }

    #[test]
    fn dot_unstuffing() {
        let mut framer = Framer::new();
        framer.start_data();
        framer.feed(b"..\r\n.with text\r\n.\r\n");

        assert_eq!(
            framer.next(),
            Some(Frame::Data(b".\r\nwith text\r\n".to_vec()))
        );
        assert_eq!(framer.next(), Some(Frame::Ready));
    }

    #[test]
    fn terminator_split_across_chunks() {
        let mut framer = Framer::new();
        framer.start_data();

        framer.feed(b"body\r\n");
        assert_eq!(framer.next(), Some(Frame::Data(b"body\r\n".to_vec())));

        framer.feed(b".");
        assert_eq!(framer.next(), None);

        framer.feed(b"\r");
        assert_eq!(framer.next(), None);

        framer.feed(b"\n");
        assert_eq!(framer.next(), Some(Frame::Ready));
    }

    #[test]
    fn leading_dot_split_across_chunks_is_unstuffed() {
        let mut framer = Framer::new();
        framer.start_data();

        framer.feed(b".");
        assert_eq!(framer.next(), None);
        framer.feed(b".still body\r\n.\r\n");

        assert_eq!(framer.next(), Some(Frame::Data(b".still body\r\n".to_vec())));
        assert_eq!(framer.next(), Some(Frame::Ready));
    }

    #[test]
    fn returns_to_command_mode_after_ready() {
        let mut framer = Framer::new();
        framer.start_data();
        framer.feed(b"body\r\n.\r\nQUIT\r\n");

        assert_eq!(framer.next(), Some(Frame::Data(b"body\r\n".to_vec())));
        assert_eq!(framer.next(), Some(Frame::Ready));
        assert_eq!(framer.next(), Some(Frame::Line("QUIT".to_string())));
    }

    #[test]
    fn empty_body_yields_ready_only() {
        let mut framer = Framer::new();
        framer.start_data();
        framer.feed(b".\r\n");
        assert_eq!(framer.next(), Some(Frame::Ready));
    }

    #[test]
    fn reset_discards_buffered_bytes() {
        let mut framer = Framer::new();
        framer.feed(b"garbage before handshake");
        framer.reset();
        assert_eq!(framer.next(), None);
        framer.feed(b"EHLO again\r\n");
        assert_eq!(framer.next(), Some(Frame::Line("EHLO again".to_string())));
    }
}
