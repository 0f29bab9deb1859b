// SPDX-License-Identifier: LGPL-2.1-or-later

//! Packet framing: "accumulate until total-length bytes present, then
//! advance past the packet" (`spec.md` §4.1), read and written
//! directly off the connection's `AsyncRead`/`AsyncWrite` halves.

use gamin_core::{MAX_PACKET_LEN, PACKET_HEADER_LEN};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::ProtocolError;

/// Read exactly one framed packet, retrying on `Interrupted` as
/// `spec.md` §4.2 requires of both ends of the handshake and the
/// steady-state read/write loops.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut header = [0u8; PACKET_HEADER_LEN];
    read_exact_retrying(reader, &mut header).await?;
    let total_len = u16::from_ne_bytes([header[0], header[1]]) as usize;
    if total_len > MAX_PACKET_LEN || total_len < PACKET_HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            ProtocolError::TotalLengthOverflow(total_len),
        ));
    }
    let mut packet = vec![0u8; total_len];
    packet[..PACKET_HEADER_LEN].copy_from_slice(&header);
    read_exact_retrying(reader, &mut packet[PACKET_HEADER_LEN..]).await?;
    Ok(packet)
}

/// Write a whole packet, looping through short writes and retrying on
/// `Interrupted` (`spec.md` §4.2's outbound-path requirement).
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < packet.len() {
        match writer.write(&packet[written..]).await {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    writer.flush().await
}

async fn read_exact_retrying<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_request, encode_request};
    use gamin_core::{ReqOptions, RequestKind};

    #[tokio::test]
    async fn read_write_packet_round_trip() {
        let packet =
            encode_request(5, RequestKind::File, ReqOptions::empty(), b"/tmp/f").expect("encode");

        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.expect("write");

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_packet(&mut cursor).await.expect("read");
        let req = decode_request(&read_back).expect("decode");
        assert_eq!(req.reqno, 5);
        assert_eq!(req.path, std::path::PathBuf::from("/tmp/f"));
    }

    #[tokio::test]
    async fn read_packet_accumulates_partial_then_full_packet() {
        let packet =
            encode_request(1, RequestKind::File, ReqOptions::empty(), b"/a").expect("encode");

        // A reader that yields the header first, then the rest, across
        // two separate poll_read calls, to exercise the retry loop the
        // way a socket delivering a partial write would.
        let (client, mut server) = tokio::io::duplex(64);
        let mut client = client;
        tokio::spawn(async move {
            server.write_all(&packet[..PACKET_HEADER_LEN]).await.expect("write header");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            server.write_all(&packet[PACKET_HEADER_LEN..]).await.expect("write rest");
        });
        let read_back = read_packet(&mut client).await.expect("read");
        assert_eq!(read_back, packet);
    }

    #[tokio::test]
    async fn read_write_packet_splits_concatenated_packets() {
        let a = encode_request(1, RequestKind::File, ReqOptions::empty(), b"/a").expect("encode");
        let b = encode_request(2, RequestKind::File, ReqOptions::empty(), b"/bb").expect("encode");

        let mut buf = Vec::new();
        write_packet(&mut buf, &a).await.expect("write a");
        write_packet(&mut buf, &b).await.expect("write b");

        let mut cursor = std::io::Cursor::new(buf);
        let first = read_packet(&mut cursor).await.expect("read a");
        assert_eq!(first, a);
        let second = read_packet(&mut cursor).await.expect("read b");
        assert_eq!(second, b);
    }
}
