//! Descriptor wire format exchanged over a FIFO.
//!
//! Wire Format (fixed 16 bytes, little-endian):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            offset                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            length             |            reserved          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! |                            cookie                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut};

/// A fixed-size driver-ABI record identifying one arena slot by offset and
/// a cookie-embedded slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor {
    /// Byte offset of the slot inside the shared region.
    pub offset: u32,
    /// Payload length, `0 <= length <= SLOT_SIZE`.
    pub length: u16,
    /// Zero on send; driver-defined on receive.
    pub reserved: u16,
    /// `(COOKIE_MAGIC << 32) | slot_index`.
    pub cookie: u64,
}

impl Descriptor {
    /// Size of a descriptor on the wire, in bytes.
    pub const WIRE_SIZE: usize = 16;

    pub(crate) fn append_to_wire(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.offset);
        buf.put_u16_le(self.length);
        buf.put_u16_le(self.reserved);
        buf.put_u64_le(self.cookie);
    }

    pub(crate) fn from_wire(buf: &mut impl Buf) -> Self {
        let offset = buf.get_u32_le();
        let length = buf.get_u16_le();
        let reserved = buf.get_u16_le();
        let cookie = buf.get_u64_le();
        Descriptor {
            offset,
            length,
            reserved,
            cookie,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use test_case::test_case;

    #[test_case(Descriptor { offset: 0, length: 0, reserved: 0, cookie: 0 })]
    #[test_case(Descriptor { offset: 4096, length: 1500, reserved: 0, cookie: (0x4242_0102 << 32) | 2 })]
    #[test_case(Descriptor { offset: u32::MAX, length: u16::MAX, reserved: u16::MAX, cookie: u64::MAX })]
    fn wire_round_trip(d: Descriptor) {
        let mut buf = BytesMut::with_capacity(Descriptor::WIRE_SIZE);
        d.append_to_wire(&mut buf);
        assert_eq!(buf.len(), Descriptor::WIRE_SIZE);

        let mut read = &buf[..];
        let decoded = Descriptor::from_wire(&mut read);
        assert_eq!(decoded, d);
    }

    #[test]
    fn wire_is_little_endian() {
        let d = Descriptor {
            offset: 0x0102_0304,
            length: 0x0506,
            reserved: 0x0708,
            cookie: 0x0102_0304_0506_0708,
        };
        let mut buf = BytesMut::new();
        d.append_to_wire(&mut buf);
        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[4..6], &[0x06, 0x05]);
    }
}
