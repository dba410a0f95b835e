use std::collections::VecDeque;

use futures_util::StreamExt;
use futures_util::stream::{BoxStream, try_unfold};

use super::SseLineStream;
use crate::error::GatewayError;

/// SSE 行切分器：接受 `\r\n`、`\n`、`\r` 三种行终止符，块边界安全
///
/// 上游 chunk 可能在任意字节处切开（包括 `\r\n` 中间），所以用
/// `last_was_cr` 记住跨 chunk 的悬挂 `\r`。
#[derive(Default)]
struct LineFramer {
    buf: Vec<u8>,
    last_was_cr: bool,
}

impl LineFramer {
    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }

    fn push(&mut self, chunk: &[u8], out: &mut VecDeque<String>) {
        for &byte in chunk {
            if self.last_was_cr && byte == b'\n' {
                // `\r\n` 的第二个字节，行已在 `\r` 处切出
                self.last_was_cr = false;
                continue;
            }
            self.last_was_cr = byte == b'\r';
            if byte == b'\n' || byte == b'\r' {
                out.push_back(self.take_line());
            } else {
                self.buf.push(byte);
            }
        }
    }

    /// 上游 EOF 时冲出未终止的尾行
    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }
}

struct LineState {
    body: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    framer: LineFramer,
    pending: VecDeque<String>,
    done: bool,
}

/// 把上游响应体转为 SSE 文本行流：空行跳过，其余行原样产出
pub fn sse_line_stream(response: reqwest::Response) -> SseLineStream {
    let state = LineState {
        body: response.bytes_stream().boxed(),
        framer: LineFramer::default(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(try_unfold(state, |mut state| async move {
        loop {
            while let Some(line) = state.pending.pop_front() {
                if !line.is_empty() {
                    return Ok(Some((line, state)));
                }
            }
            if state.done {
                return Ok(None);
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.framer.push(&chunk, &mut state.pending),
                Some(Err(e)) => return Err(GatewayError::Http(e)),
                None => {
                    state.done = true;
                    if let Some(line) = state.framer.finish() {
                        state.pending.push_back(line);
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut framer = LineFramer::default();
        let mut out = VecDeque::new();
        for chunk in chunks {
            framer.push(chunk, &mut out);
        }
        if let Some(tail) = framer.finish() {
            out.push_back(tail);
        }
        out.into_iter().filter(|l| !l.is_empty()).collect()
    }

    #[test]
    fn splits_lf_terminated_lines() {
        let lines = frame_all(&[b"data: a\n\ndata: b\n\n"]);
        assert_eq!(lines, vec!["data: a", "data: b"]);
    }

    #[test]
    fn crlf_parses_identically_to_lf() {
        let lf = frame_all(&[b"data: a\n\ndata: b\n\n"]);
        let crlf = frame_all(&[b"data: a\r\n\r\ndata: b\r\n\r\n"]);
        assert_eq!(lf, crlf);
    }

    #[test]
    fn bare_cr_terminates_lines() {
        let lines = frame_all(&[b"data: a\rdata: b\r"]);
        assert_eq!(lines, vec!["data: a", "data: b"]);
    }

    #[test]
    fn crlf_split_across_chunks_yields_one_line() {
        let lines = frame_all(&[b"data: a\r", b"\ndata: b\n"]);
        assert_eq!(lines, vec!["data: a", "data: b"]);
    }

    #[test]
    fn trailing_buffer_is_flushed_on_eof() {
        let lines = frame_all(&[b"data: a\ndata: tail"]);
        assert_eq!(lines, vec!["data: a", "data: tail"]);
    }
}
