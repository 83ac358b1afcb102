use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Frames above this size are rejected on both ends.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Write `message` as one length-prefixed JSON frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> io::Result<()> {
    let body = serde_json::to_vec(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", body.len()),
        ));
    }
    writer.write_u32::<LittleEndian>(body.len() as u32)?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Read one length-prefixed JSON frame.
///
/// Malformed frames surface as [`io::ErrorKind::InvalidData`]; a peer that
/// closed the connection between frames yields `UnexpectedEof`.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", len),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Request;
    use std::io::Cursor;

    #[test]
    fn frame_layout_is_length_then_json() {
        let mut buf = Vec::new();
        let req = Request {
            id: 7,
            method: "echo".into(),
            params: vec![serde_json::json!(1)],
        };
        write_frame(&mut buf, &req).unwrap();
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);

        let back: Request = read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn oversized_length_is_invalid_data() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>((MAX_FRAME_LEN + 1) as u32).unwrap();
        let err = read_frame::<_, Request>(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn garbage_body_is_invalid_data() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(3).unwrap();
        buf.extend_from_slice(b"{{{");
        let err = read_frame::<_, Request>(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_stream_is_eof() {
        let err = read_frame::<_, Request>(&mut Cursor::new(Vec::new())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
