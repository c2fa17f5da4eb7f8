//! Lazy newline-delimited record readers.
//!
//! Lines are byte strings: the terminating `\n` is stripped, a trailing
//! `\r` is kept as data. A final line without `\n` is still yielded. Both
//! reader variants honor the cancellation token and expose the identical
//! splitting behavior.

use std::io::prelude::*;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, RecvError, SendTimeoutError};
use parking_lot::Mutex;

use crate::cancel::{CancelToken, POLL_QUANTUM};
use crate::error::{Error, Result};

/// Pull-style line reader.
///
/// The cancellation token is checked before each read; a fired token ends
/// the sequence with its error. The iterator is fused.
pub struct LineReader<R> {
    reader: R,
    cancel: CancelToken,
    done: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(cancel: CancelToken, reader: R) -> Self {
        LineReader {
            reader,
            cancel,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Err(err) = self.cancel.check() {
            self.done = true;
            return Some(Err(err));
        }

        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Some(Ok(line))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err.into()))
            }
        }
    }
}

/// Push-style line reader.
///
/// A background producer thread splits the source into lines and feeds a
/// bounded queue; the consumer iterates until the producer closes it. A
/// fired cancellation token unblocks a producer stuck on a full queue and
/// terminates it; the terminal error (read failure or cancellation) becomes
/// observable by the consumer once the queue is drained.
pub struct LineFeed {
    lines: Receiver<Vec<u8>>,
    terminal: Arc<Mutex<Option<Error>>>,
    done: bool,
}

impl LineFeed {
    pub fn spawn<R>(cancel: CancelToken, reader: R, queue_len: usize) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = bounded::<Vec<u8>>(queue_len.max(1));
        let terminal = Arc::new(Mutex::new(None));

        let producer_terminal = terminal.clone();
        let spawned = thread::Builder::new()
            .name("extsort-line-feed".to_string())
            .spawn(move || {
                let mut lines = LineReader::new(cancel.clone(), reader);
                for line in &mut lines {
                    let mut pending = match line {
                        Ok(line) => line,
                        Err(err) => {
                            *producer_terminal.lock() = Some(err);
                            return;
                        }
                    };

                    loop {
                        match tx.send_timeout(pending, POLL_QUANTUM) {
                            Ok(()) => break,
                            Err(SendTimeoutError::Timeout(line)) => {
                                if let Some(err) = cancel.status() {
                                    *producer_terminal.lock() = Some(err);
                                    return;
                                }
                                pending = line;
                            }
                            // consumer is gone
                            Err(SendTimeoutError::Disconnected(_)) => return,
                        }
                    }
                }
            });

        if let Err(err) = spawned {
            *terminal.lock() = Some(err.into());
        }

        LineFeed {
            lines: rx,
            terminal,
            done: false,
        }
    }
}

impl Iterator for LineFeed {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.lines.recv() {
            Ok(line) => Some(Ok(line)),
            Err(RecvError) => {
                self.done = true;
                self.terminal.lock().take().map(Err)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{LineFeed, LineReader};
    use crate::cancel::CancelToken;
    use crate::error::{Error, Result};

    fn pull(data: &str) -> Vec<Result<Vec<u8>>> {
        LineReader::new(CancelToken::new(), io::Cursor::new(data.as_bytes().to_vec())).collect()
    }

    fn push(data: &str) -> Vec<Result<Vec<u8>>> {
        LineFeed::spawn(
            CancelToken::new(),
            io::Cursor::new(data.as_bytes().to_vec()),
            4,
        )
        .collect()
    }

    fn unwrap_lines(lines: Vec<Result<Vec<u8>>>) -> Vec<String> {
        lines
            .into_iter()
            .map(|line| String::from_utf8(line.unwrap()).unwrap())
            .collect()
    }

    #[rstest]
    #[case("", vec![])]
    #[case("\n", vec![""])]
    #[case("\n\n", vec!["", ""])]
    #[case("1", vec!["1"])]
    #[case("1\n2", vec!["1", "2"])]
    #[case("1\n22\n333\n", vec!["1", "22", "333"])]
    #[case("1\r\n2\r", vec!["1\r", "2\r"])]
    fn test_line_splitting(#[case] data: &str, #[case] expected: Vec<&str>) {
        assert_eq!(unwrap_lines(pull(data)), expected);
        assert_eq!(unwrap_lines(push(data)), expected);
    }

    #[test]
    fn test_pull_reader_is_fused() {
        let mut lines = LineReader::new(CancelToken::new(), io::Cursor::new(b"1\n".to_vec()));
        assert_eq!(lines.next().unwrap().unwrap(), b"1");
        assert!(lines.next().is_none());
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_pull_reader_cancellation() {
        let token = CancelToken::new();
        token.cancel();

        let mut lines = LineReader::new(token, io::Cursor::new(b"1\n2\n".to_vec()));
        assert!(matches!(lines.next(), Some(Err(Error::Cancelled))));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_push_reader_cancellation_unblocks_producer() {
        let token = CancelToken::new();
        // queue of one line; the producer blocks on the second
        let mut lines = LineFeed::spawn(
            token.clone(),
            io::Cursor::new(b"1\n2\n3\n".to_vec()),
            1,
        );

        assert_eq!(lines.next().unwrap().unwrap(), b"1");
        token.cancel();

        let mut terminal = None;
        for line in &mut lines {
            match line {
                Ok(_) => continue,
                Err(err) => terminal = Some(err),
            }
        }

        assert!(matches!(terminal, Some(Error::Cancelled)));
    }
}
