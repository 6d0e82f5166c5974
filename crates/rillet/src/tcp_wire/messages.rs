use bytes::{Buf, BufMut, BytesMut};
use tokio::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{Block, BlockInfo};
use crate::{bitfield::Bitfield, error::Error};

pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024; // 2MB maximum message size

/// Core messages exchanged after a successful handshake.
/// These are from the vanilla protocol, with no extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum Core {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(usize),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
}

/// The IDs of the [`Core`] messages.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoreId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for CoreId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use CoreId::*;
        Ok(match value {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CoreCodec;

impl Encoder<Core> for CoreCodec {
    type Error = Error;

    fn encode(&mut self, item: Core, buf: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Core::KeepAlive => {
                buf.put_u32(0);
            }
            Core::Choke => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Choke as u8);
            }
            Core::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Unchoke as u8);
            }
            Core::Interested => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Interested as u8);
            }
            Core::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(CoreId::NotInterested as u8);
            }
            // <len=0005><id=4><piece index>
            Core::Have(piece_index) => {
                buf.put_u32(1 + 4);
                buf.put_u8(CoreId::Have as u8);
                let piece_index = piece_index
                    .try_into()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                buf.put_u32(piece_index);
            }
            // <len=0001+X><id=5><bitfield>
            Core::Bitfield(bitfield) => {
                let v = bitfield.into_vec();
                let len: u32 = (1 + v.len())
                    .try_into()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                buf.put_u32(len);
                buf.put_u8(CoreId::Bitfield as u8);
                buf.extend_from_slice(&v);
            }
            // <len=0013><id=6><index><begin><length>
            Core::Request(block) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(CoreId::Request as u8);
                block.encode(buf);
            }
            // <len=0009+X><id=7><index><begin><block>
            Core::Piece(block) => {
                let Block { index, begin, block } = block;

                let len: u32 = (1 + 4 + 4 + block.len())
                    .try_into()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                buf.put_u32(len);
                buf.put_u8(CoreId::Piece as u8);

                let index = index
                    .try_into()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

                buf.put_u32(index);
                buf.put_u32(begin);
                buf.put(&block[..]);
            }
            // <len=0013><id=8><index><begin><length>
            Core::Cancel(block) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(CoreId::Cancel as u8);
                block.encode(buf);
            }
        }
        Ok(())
    }
}

impl Decoder for CoreCodec {
    type Item = Core;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // the message length header must be present at the minimum,
            // otherwise we can't determine the message type
            if buf.len() < 4 {
                return Ok(None);
            }

            // peek at length prefix without consuming
            let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

            if size == 0 {
                buf.advance(4);
                return Ok(Some(Core::KeepAlive));
            }

            if size > MAX_MESSAGE_SIZE {
                return Err(Error::MessageTooLarge(size));
            }

            // incomplete message, don't advance the cursor and wait for the
            // rest of the frame.
            if buf.len() < 4 + size {
                buf.reserve(4 + size - buf.len());
                return Ok(None);
            }

            let mut frame = buf.split_to(4 + size);
            frame.advance(4);

            let msg_id = frame.get_u8();

            let Ok(msg_id) = CoreId::try_from(msg_id) else {
                // unknown message id, the frame is already consumed, try the
                // next one
                warn!("unknown message_id {msg_id:?}");
                continue;
            };

            return decode_payload(msg_id, frame).map(Some);
        }
    }
}

/// Parse the payload of a complete frame, after the message id.
fn decode_payload(msg_id: CoreId, mut frame: BytesMut) -> Result<Core, Error> {
    let expect = |frame: &BytesMut, len: usize| {
        if frame.len() == len {
            Ok(())
        } else {
            Err(Error::MessageResponse)
        }
    };

    let msg = match msg_id {
        // <len=0001><id=0>
        CoreId::Choke => Core::Choke,

        // <len=0001><id=1>
        CoreId::Unchoke => Core::Unchoke,

        // <len=0001><id=2>
        CoreId::Interested => Core::Interested,

        // <len=0001><id=3>
        CoreId::NotInterested => Core::NotInterested,

        CoreId::Have => {
            expect(&frame, 4)?;
            Core::Have(frame.get_u32() as usize)
        }

        CoreId::Bitfield => Core::Bitfield(Bitfield::from_vec(frame.to_vec())),

        CoreId::Request | CoreId::Cancel => {
            expect(&frame, 4 + 4 + 4)?;
            let info = BlockInfo {
                index: frame.get_u32(),
                begin: frame.get_u32(),
                len: frame.get_u32(),
            };
            if msg_id == CoreId::Request {
                Core::Request(info)
            } else {
                Core::Cancel(info)
            }
        }

        CoreId::Piece => {
            if frame.len() < 4 + 4 {
                return Err(Error::MessageResponse);
            }
            let index = frame.get_u32() as usize;
            let begin = frame.get_u32();

            Core::Piece(Block { index, begin, block: frame.to_vec() })
        }
    };

    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp_wire::BLOCK_LEN;
    use bitvec::{bitvec, prelude::Msb0};

    fn encode(msg: Core) -> BytesMut {
        let mut buf = BytesMut::new();
        CoreCodec.encode(msg, &mut buf).unwrap();
        buf
    }

    #[test]
    fn request_wire_format() {
        let buf = encode(Core::Request(
            BlockInfo::new().index(3).begin(BLOCK_LEN).len(BLOCK_LEN),
        ));

        assert_eq!(
            &buf[..],
            &[0, 0, 0, 13, 6, 0, 0, 0, 3, 0, 0, 64, 0, 0, 0, 64, 0]
        );
        assert_eq!(&encode(Core::Interested)[..], &[0, 0, 0, 1, 2]);
    }

    #[test]
    fn partial_frame_waits() {
        let mut full = encode(Core::Piece(Block {
            index: 1,
            begin: 16384,
            block: vec![7; 100],
        }));
        let rest = full.split_off(50);

        let mut codec = CoreCodec;
        assert_eq!(codec.decode(&mut full).unwrap(), None);
        // nothing was consumed
        assert_eq!(full.len(), 50);

        full.extend_from_slice(&rest);
        let msg = codec.decode(&mut full).unwrap().unwrap();

        assert_eq!(
            msg,
            Core::Piece(Block { index: 1, begin: 16384, block: vec![7; 100] })
        );
        assert!(full.is_empty());
    }

    #[test]
    fn keepalive_and_glued_messages() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.extend_from_slice(&encode(Core::Unchoke));
        buf.extend_from_slice(&encode(Core::Have(9)));
        buf.extend_from_slice(&[0, 0]);

        let mut codec = CoreCodec;
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Core::KeepAlive));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Core::Unchoke));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Core::Have(9)));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn bitfield_is_msb_first() {
        let mut buf = BytesMut::from(&[0, 0, 0, 2, 5, 0b1100_0000][..]);

        let msg = CoreCodec.decode(&mut buf).unwrap().unwrap();
        let Core::Bitfield(bitfield) = msg else {
            panic!("expected a bitfield");
        };

        assert_eq!(bitfield.iter_ones().collect::<Vec<_>>(), vec![0, 1]);

        let bitfield = bitvec![u8, Msb0; 1, 0, 1];
        assert_eq!(&encode(Core::Bitfield(bitfield))[..], &[0, 0, 0, 2, 5, 0b1010_0000]);
    }

    #[test]
    fn unknown_message_is_skipped() {
        let mut buf = BytesMut::from(&[0, 0, 0, 3, 20, 1, 2][..]);
        buf.extend_from_slice(&encode(Core::Choke));

        assert_eq!(CoreCodec.decode(&mut buf).unwrap(), Some(Core::Choke));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let size = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        let mut buf = BytesMut::from(&size[..]);
        buf.put_u8(7);

        let r = CoreCodec.decode(&mut buf);
        assert!(matches!(r, Err(Error::MessageTooLarge(_))));
    }

    #[test]
    fn malformed_have() {
        let mut buf = BytesMut::from(&[0, 0, 0, 3, 4, 0, 1][..]);
        let r = CoreCodec.decode(&mut buf);
        assert!(matches!(r, Err(Error::MessageResponse)));
    }
}
