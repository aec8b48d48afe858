//! Identity preamble for stream connections.
//!
//! Raw TCP has no headers, so the generator opens every connection with a
//! short header block in HTTP style:
//!
//! ```text
//! Availability-Zone: us-east-1b\r\n
//! Pod-Name: echo-client-0\r\n
//! \r\n
//! ```
//!
//! The responder consumes the block and does not echo it. Everything after
//! the blank line is payload.

use std::io;
use taler_types::{PeerIdentity, AVAILABILITY_ZONE_HEADER, POD_NAME_HEADER};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the encoded preamble.
pub const MAX_PREAMBLE_BYTES: u64 = 4096;

/// Encode `identity` as a preamble block.
pub fn encode_identity(identity: &PeerIdentity) -> Vec<u8> {
    format!(
        "{AVAILABILITY_ZONE_HEADER}: {}\r\n{POD_NAME_HEADER}: {}\r\n\r\n",
        identity.zone, identity.pod
    )
    .into_bytes()
}

/// Write the preamble for `identity` and flush it.
pub async fn write_identity<W>(writer: &mut W, identity: &PeerIdentity) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_identity(identity)).await?;
    writer.flush().await
}

/// Read a preamble block up to and including its blank line.
///
/// Header names match case-insensitively and unknown headers are ignored.
/// Payload bytes that follow stay in the reader's buffer.
pub async fn read_identity<R>(reader: &mut R) -> io::Result<PeerIdentity>
where
    R: AsyncBufRead + Unpin,
{
    let mut identity = PeerIdentity::default();
    let mut limited = reader.take(MAX_PREAMBLE_BYTES);
    let mut line = String::new();

    loop {
        line.clear();
        let n = limited.read_line(&mut line).await?;
        if n == 0 {
            return Err(if limited.limit() == 0 {
                io::Error::new(io::ErrorKind::InvalidData, "preamble too long")
            } else {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed in preamble")
            });
        }
        if !line.ends_with('\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "preamble too long",
            ));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(identity);
        }

        let (name, value) = trimmed.split_once(':').ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed preamble line: {trimmed:?}"),
            )
        })?;
        let value = value.trim().to_string();
        if name.trim().eq_ignore_ascii_case(AVAILABILITY_ZONE_HEADER) {
            identity.zone = value;
        } else if name.trim().eq_ignore_ascii_case(POD_NAME_HEADER) {
            identity.pod = value;
        }
    }
}
