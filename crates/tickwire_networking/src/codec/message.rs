//! Self-contained messages packed into a single packet.

use std::collections::BTreeMap;

use super::bitstream::{BitReader, BitWriter};
use super::stream::Stream;
use crate::error::StreamResult;

/// Anything that serializes itself through a [`Stream`].
pub trait Message {
    /// Reads or writes every field. Returns false on failure.
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool;
}

/// Writes `message` into `buffer`, returning the number of bytes used.
///
/// # Errors
///
/// Returns the stream failure if the message doesn't fit or is malformed.
pub fn pack<M: Message + ?Sized>(message: &mut M, buffer: &mut [u8]) -> StreamResult<usize> {
    let mut writer = BitWriter::new(buffer);
    message.exchange(&mut writer);
    writer.check()?;
    Ok(writer.bytes_written())
}

/// Reads `message` from `bytes`.
///
/// # Errors
///
/// Returns the stream failure if the bytes are truncated or malformed.
pub fn unpack<M: Message + ?Sized>(message: &mut M, bytes: &[u8]) -> StreamResult<()> {
    let mut reader = BitReader::new(bytes);
    message.exchange(&mut reader);
    reader.check()
}

/// Newline-separated `key:value` text, used for the handshake.
///
/// ```text
/// Response:ServerInfo
/// Name:arena-01
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextMessage {
    /// Raw text.
    pub text: String,
}

impl TextMessage {
    /// Builds a message from `key:value` pairs, one per line.
    #[must_use]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let text = pairs
            .into_iter()
            .map(|(key, value)| format!("{key}:{value}\n"))
            .collect();
        Self { text }
    }

    /// Parses the text into a map. Lines that aren't exactly one
    /// `key:value` pair are skipped; later duplicates win.
    #[must_use]
    pub fn tokens(&self) -> BTreeMap<String, String> {
        self.text
            .lines()
            .filter_map(|line| {
                let mut parts = line.split(':');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(key), Some(value), None) => Some((key.to_owned(), value.to_owned())),
                    _ => None,
                }
            })
            .collect()
    }
}

impl Message for TextMessage {
    fn exchange(&mut self, stream: &mut dyn Stream) -> bool {
        stream.exchange_string(&mut self.text)
    }
}
