//! Outbound path to the remote server.
//!
//! Instructions are queued on an [`Outbox`] and written by a background task
//! through [`MushLineCodec`], which turns each logical instruction into a
//! single physical line.

use bytes::{BufMut, BytesMut};
use futures::SinkExt;
use tokio::{
    io::AsyncWrite,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::codec::{Encoder, FramedWrite};
use tracing::{debug, trace};

/// Encoder for MUSH instructions.
///
/// Embedded newlines become `%r` and tabs become `%t`, so one instruction
/// always occupies exactly one line on the wire.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use mudbridge::outbound::MushLineCodec;
/// use tokio_util::codec::Encoder;
///
/// let mut buf = BytesMut::new();
/// MushLineCodec
///     .encode("@pemit #1=one\ntwo".to_owned(), &mut buf)
///     .expect("encode");
/// assert_eq!(&buf[..], b"@pemit #1=one%rtwo\n");
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct MushLineCodec;

impl MushLineCodec {
    fn escape(line: &str, dst: &mut BytesMut) {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    dst.put_slice(b"%r");
                }
                '\n' => dst.put_slice(b"%r"),
                '\t' => dst.put_slice(b"%t"),
                other => {
                    let mut utf8 = [0_u8; 4];
                    dst.put_slice(other.encode_utf8(&mut utf8).as_bytes());
                }
            }
        }
    }
}

impl Encoder<String> for MushLineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        Self::escape(&item, dst);
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Cloneable handle for queueing instructions to the remote server.
///
/// Sending never blocks. Instructions queued after the writer has stopped
/// are dropped.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: UnboundedSender<String>,
}

impl Outbox {
    /// Create an outbox and the receiver its instructions arrive on.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue one instruction. Returns `false` if the writer has stopped.
    pub fn send(&self, instruction: impl Into<String>) -> bool {
        let instruction = instruction.into();
        trace!(%instruction, "queueing instruction");
        self.tx.send(instruction).is_ok()
    }

    /// Queue several instructions in order.
    pub fn send_all<I, S>(&self, instructions: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        instructions.into_iter().all(|instruction| self.send(instruction))
    }

    /// Whether the writer has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

/// Drain `rx` into `writer` until every [`Outbox`] is dropped.
///
/// # Errors
///
/// Returns the first I/O error raised while writing.
pub async fn drain<W>(writer: W, mut rx: UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, MushLineCodec);
    while let Some(instruction) = rx.recv().await {
        framed.feed(instruction).await?;
        while let Ok(next) = rx.try_recv() {
            framed.feed(next).await?;
        }
        SinkExt::<String>::flush(&mut framed).await?;
    }
    SinkExt::<String>::close(&mut framed).await?;
    debug!("outbound writer finished");
    Ok(())
}

/// Spawn [`drain`] on the current runtime.
pub fn spawn_writer<W>(writer: W, rx: UnboundedReceiver<String>) -> JoinHandle<std::io::Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(drain(writer, rx))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, duplex};

    use super::*;

    #[rstest]
    #[case("plain", "plain\n")]
    #[case("a\nb", "a%rb\n")]
    #[case("a\r\nb", "a%rb\n")]
    #[case("a\rb", "a%rb\n")]
    #[case("col\tcol", "col%tcol\n")]
    #[case("caf\u{e9}", "caf\u{e9}\n")]
    #[case("", "\n")]
    fn escapes_line_breaks_and_tabs(#[case] input: &str, #[case] expected: &str) {
        let mut buf = BytesMut::new();
        MushLineCodec
            .encode(input.to_owned(), &mut buf)
            .expect("encode");
        assert_eq!(std::str::from_utf8(&buf).expect("utf8"), expected);
    }

    #[tokio::test]
    async fn writer_emits_instructions_in_order() {
        let (client, mut server) = duplex(1024);
        let (outbox, rx) = Outbox::channel();
        let writer = spawn_writer(client, rx);

        assert!(outbox.send("@pemit #1=hi"));
        assert!(outbox.send_all(["think 1", "think\t2"]));
        drop(outbox);
        writer.await.expect("join").expect("write");

        let mut text = String::new();
        server.read_to_string(&mut text).await.expect("read");
        assert_eq!(text, "@pemit #1=hi\nthink 1\nthink%t2\n");
    }

    #[tokio::test]
    async fn send_reports_stopped_writer() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        assert!(outbox.is_closed());
        assert!(!outbox.send("lost"));
    }
}
