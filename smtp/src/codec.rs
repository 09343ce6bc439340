use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::error::Error;
use crate::response::{parse_reply, Reply};

/// Replies longer than this without a terminating line are treated as garbage.
const MAX_REPLY_LEN: usize = 64 * 1024;

#[derive(Default)]
pub struct SmtpCodec;

impl Decoder for SmtpCodec {
    type Item = Reply;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // walk complete lines until one of them is the last line of a reply
        let mut offset = 0;
        loop {
            let newline = match src[offset..].iter().position(|b| *b == b'\n') {
                Some(pos) => pos,
                None => {
                    if src.len() > MAX_REPLY_LEN {
                        return Err(Error::Malformed("reply too long".to_owned()));
                    }
                    return Ok(None);
                }
            };
            let line = &src[offset..offset + newline];
            offset += newline + 1;

            // "250-" continues, "250 " or a bare "250" ends it
            if line.len() > 3 && line[3] == b'-' {
                continue;
            }
            break;
        }

        let bytes = src.split_to(offset);
        let raw = std::str::from_utf8(&bytes)
            .map_err(|_| Error::Malformed(String::from_utf8_lossy(&bytes).into_owned()))?;
        trace!("<<< {:?}", raw);
        parse_reply(raw).map(Some)
    }
}

impl Encoder<Command> for SmtpCodec {
    type Error = Error;

    fn encode(&mut self, cmd: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!(">>> {:?}", cmd);
        let line = cmd.to_string();
        // an address or name carrying CRLF would smuggle in a second command
        if !matches!(cmd, Command::Content(_)) && line.contains(|c| c == '\r' || c == '\n') {
            return Err(Error::LineBreak(cmd.name()));
        }
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        // message content already carries its own terminator
        if !matches!(cmd, Command::Content(_)) {
            dst.put_slice(b"\r\n");
        }
        Ok(())
    }
}
