use std::fs::File;
use std::io::{self, Read, Write};

use bytes::Bytes;
use thiserror::Error;

use crate::http::response::{FileBody, Response, StatusCode};

/// Where a response is in its transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitState {
    HeaderPending,
    BodyStreaming,
    Done,
    Failed,
}

/// Outcome of one non-failing transmit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The socket refused more bytes; resume on the next writable event.
    WouldBlock,
    /// A chunk went out and the socket may take more; resume on the next tick.
    Yielded,
    /// The whole response has been written.
    Complete,
}

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("socket write failed: {0}")]
    Io(#[from] io::Error),

    #[error("partial header write: {written} of {len} bytes")]
    PartialHeader { written: usize, len: usize },

    #[error("socket accepted zero bytes")]
    WriteZero,

    #[error("file read failed: {0}")]
    FileRead(#[source] io::Error),

    #[error("file size changed during transmission: advertised {expected}, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("transmission already failed")]
    Poisoned,
}

/// Resumable sender for one response.
///
/// The head goes out in a single write. The file body is then streamed one chunk
/// per step through a scratch buffer. Bytes read from disk (`read_offset`) and bytes
/// accepted by the socket (`bytes_sent`) are tracked separately, so an unsent tail
/// simply stays in the scratch buffer until the socket is writable again.
pub struct ResponseWriter<F = File> {
    status: StatusCode,
    head: Bytes,
    body: Option<FileBody<F>>,
    state: TransmitState,
    headers_sent: bool,
    bytes_sent: u64,
    read_offset: u64,
    chunk: Box<[u8]>,
    chunk_pos: usize,
    chunk_len: usize,
}

impl<F: Read> ResponseWriter<F> {
    pub fn new(response: Response<F>, chunk_size: usize) -> Self {
        let chunk = if response.body.is_some() {
            vec![0u8; chunk_size.max(1)].into_boxed_slice()
        } else {
            Box::default()
        };

        Self {
            status: response.status,
            head: response.head,
            body: response.body,
            state: TransmitState::HeaderPending,
            headers_sent: false,
            bytes_sent: 0,
            read_offset: 0,
            chunk,
            chunk_pos: 0,
            chunk_len: 0,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn state(&self) -> TransmitState {
        self.state
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Body bytes accepted by the socket so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn file_size(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.size)
    }

    /// Runs one transmit step against `out`.
    ///
    /// Any error leaves the writer in `Failed`; the connection must be closed.
    pub fn transmit<W: Write>(&mut self, out: &mut W) -> Result<Progress, TransmitError> {
        let result = self.step(out);
        if result.is_err() {
            self.state = TransmitState::Failed;
        }
        result
    }

    fn step<W: Write>(&mut self, out: &mut W) -> Result<Progress, TransmitError> {
        loop {
            match self.state {
                TransmitState::HeaderPending => {
                    if let Some(progress) = self.send_head(out)? {
                        return Ok(progress);
                    }
                }
                TransmitState::BodyStreaming => return self.send_chunk(out),
                TransmitState::Done => return Ok(Progress::Complete),
                TransmitState::Failed => return Err(TransmitError::Poisoned),
            }
        }
    }

    /// Returns `Some` when the step should end here.
    fn send_head<W: Write>(&mut self, out: &mut W) -> Result<Option<Progress>, TransmitError> {
        let len = self.head.len();
        if len > 0 {
            match write_once(out, &self.head) {
                Ok(0) => return Err(TransmitError::WriteZero),
                Ok(written) if written < len => {
                    return Err(TransmitError::PartialHeader { written, len });
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Some(Progress::WouldBlock));
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.headers_sent = true;
        if self.body.is_some() {
            self.state = TransmitState::BodyStreaming;
            Ok(None)
        } else {
            self.state = TransmitState::Done;
            Ok(Some(Progress::Complete))
        }
    }

    fn send_chunk<W: Write>(&mut self, out: &mut W) -> Result<Progress, TransmitError> {
        let Some(body) = self.body.as_mut() else {
            self.state = TransmitState::Done;
            return Ok(Progress::Complete);
        };

        if self.chunk_pos == self.chunk_len {
            let n = loop {
                match body.file.read(&mut self.chunk) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(TransmitError::FileRead(e)),
                }
            };

            if n == 0 {
                if self.bytes_sent == body.size {
                    self.state = TransmitState::Done;
                    return Ok(Progress::Complete);
                }
                return Err(TransmitError::SizeMismatch {
                    expected: body.size,
                    actual: self.read_offset,
                });
            }

            let read_to = self.read_offset + n as u64;
            if read_to > body.size {
                return Err(TransmitError::SizeMismatch {
                    expected: body.size,
                    actual: read_to,
                });
            }
            self.read_offset = read_to;
            self.chunk_pos = 0;
            self.chunk_len = n;
        }

        while self.chunk_pos < self.chunk_len {
            match write_once(out, &self.chunk[self.chunk_pos..self.chunk_len]) {
                Ok(0) => return Err(TransmitError::WriteZero),
                Ok(n) => {
                    self.chunk_pos += n;
                    self.bytes_sent += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::WouldBlock),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Progress::Yielded)
    }
}

fn write_once<W: Write>(out: &mut W, buf: &[u8]) -> io::Result<usize> {
    loop {
        match out.write(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;

    use super::*;

    enum Step {
        Accept(usize),
        Block,
        Fail,
    }

    /// Socket stand-in that follows a script, then accepts everything.
    struct ScriptedSocket {
        script: VecDeque<Step>,
        written: Vec<u8>,
    }

    impl ScriptedSocket {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script: script.into(),
                written: Vec::new(),
            }
        }
    }

    impl Write for ScriptedSocket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Step::Accept(n)) => {
                    let n = n.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Some(Step::Block) => Err(io::ErrorKind::WouldBlock.into()),
                Some(Step::Fail) => Err(io::ErrorKind::BrokenPipe.into()),
                None => {
                    self.written.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn file_writer(content: &[u8], advertised: u64, chunk: usize) -> ResponseWriter<Cursor<Vec<u8>>> {
        ResponseWriter::new(Response::file(Cursor::new(content.to_vec()), advertised), chunk)
    }

    fn drive(writer: &mut ResponseWriter<Cursor<Vec<u8>>>, socket: &mut ScriptedSocket) -> usize {
        let mut blocked = 0;
        loop {
            match writer.transmit(socket).unwrap() {
                Progress::Complete => return blocked,
                Progress::WouldBlock => blocked += 1,
                Progress::Yielded => {}
            }
        }
    }

    #[test]
    fn error_response_completes_after_head() {
        let mut writer: ResponseWriter<Cursor<Vec<u8>>> =
            ResponseWriter::new(Response::error(StatusCode::MethodNotAllowed), 16);
        let mut socket = ScriptedSocket::new(vec![]);

        assert_eq!(writer.transmit(&mut socket).unwrap(), Progress::Complete);
        assert!(writer.headers_sent());
        assert_eq!(writer.state(), TransmitState::Done);
        assert!(socket.written.starts_with(b"HTTP/1.1 405 Method Not Allowed\r\n"));
    }

    #[test]
    fn blocked_head_leaves_state_unchanged() {
        let mut writer = file_writer(b"hello", 5, 4);
        let mut socket = ScriptedSocket::new(vec![Step::Block]);

        assert_eq!(writer.transmit(&mut socket).unwrap(), Progress::WouldBlock);
        assert_eq!(writer.state(), TransmitState::HeaderPending);
        assert!(!writer.headers_sent());
        assert!(socket.written.is_empty());
    }

    #[test]
    fn partial_head_write_is_fatal() {
        let mut writer = file_writer(b"hello", 5, 4);
        let mut socket = ScriptedSocket::new(vec![Step::Accept(3)]);

        assert!(matches!(
            writer.transmit(&mut socket),
            Err(TransmitError::PartialHeader { written: 3, .. })
        ));
        assert_eq!(writer.state(), TransmitState::Failed);
        assert!(matches!(writer.transmit(&mut socket), Err(TransmitError::Poisoned)));
    }

    #[test]
    fn body_resumes_after_repeated_would_block() {
        let content: Vec<u8> = (0..100u8).collect();
        let mut writer = file_writer(&content, 100, 32);
        let mut socket = ScriptedSocket::new(vec![
            Step::Accept(usize::MAX),
            Step::Accept(10),
            Step::Block,
            Step::Block,
            Step::Accept(5),
            Step::Block,
            Step::Accept(1),
        ]);

        let blocked = drive(&mut writer, &mut socket);

        assert_eq!(blocked, 3);
        assert_eq!(writer.bytes_sent(), writer.file_size());
        let head_len = writer.head.len();
        assert_eq!(&socket.written[head_len..], &content[..]);
    }

    #[test]
    fn empty_file_completes() {
        let mut writer = file_writer(b"", 0, 8);
        let mut socket = ScriptedSocket::new(vec![]);

        assert_eq!(drive(&mut writer, &mut socket), 0);
        assert!(socket.written.ends_with(b"Content-Length: 0\r\nConnection: close\r\n\r\n"));
    }

    #[test]
    fn shrunken_file_is_fatal() {
        let mut writer = file_writer(b"short", 20, 8);
        let mut socket = ScriptedSocket::new(vec![]);

        assert_eq!(writer.transmit(&mut socket).unwrap(), Progress::Yielded);
        assert!(matches!(
            writer.transmit(&mut socket),
            Err(TransmitError::SizeMismatch { expected: 20, actual: 5 })
        ));
    }

    #[test]
    fn grown_file_is_fatal_before_overrun() {
        let mut writer = file_writer(b"0123456789", 4, 8);
        let mut socket = ScriptedSocket::new(vec![]);

        assert!(matches!(
            writer.transmit(&mut socket),
            Err(TransmitError::SizeMismatch { expected: 4, actual: 8 })
        ));
        assert_eq!(writer.bytes_sent(), 0);
    }

    #[test]
    fn socket_error_mid_body_is_fatal() {
        let mut writer = file_writer(b"0123456789", 10, 4);
        let mut socket = ScriptedSocket::new(vec![Step::Accept(usize::MAX), Step::Accept(2), Step::Fail]);

        assert!(matches!(writer.transmit(&mut socket), Err(TransmitError::Io(_))));
        assert_eq!(writer.bytes_sent(), 2);
    }
}
