use crate::error::ArqError;
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use std::fmt::{Debug, Formatter};

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct MessageFlags: u8 {
        const ACK  = 0b0000_0001;
        const INIT = 0b0000_0010;
        const END  = 0b0000_0100;
        const PING = 0b0000_1000;
    }
}

/// A single protocol message, i.e. the full payload of one UDP datagram.
///
/// Wire format (all numbers little endian):
/// ```ascii
///  0: sequence number (u32)
///  4: ack number (u32)
///  8: flags (u8) - bit 0 ACK, bit 1 INIT, bit 2 END, bit 3 PING, bits 4-7 reserved (0)
///  9: message type (u16)
/// 11: payload (0..=1500 bytes)
/// ```
///
/// There is no checksum; corruption is left to the underlying transport.
///
/// Two messages are the same message iff their sequence numbers are equal: sequence number
///  is the identity for ordering and deduplication in channel buffers. `PartialEq` compares
///  all fields though, see [Message::same_sequence].
#[derive(Clone, Eq, PartialEq)]
pub struct Message {
    pub message_type: u16,
    pub sequence: u32,
    pub ack: u32,
    pub flags: MessageFlags,
    payload: Vec<u8>,
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MSG{{#{} ack {} {:?} type {} len {}}}", self.sequence, self.ack, self.flags, self.message_type, self.payload.len())
    }
}

impl Message {
    pub const HEADER_LEN: usize = 11;
    pub const MAX_PAYLOAD_LEN: usize = 1500;
    pub const MAX_DATAGRAM_LEN: usize = Self::HEADER_LEN + Self::MAX_PAYLOAD_LEN;

    /// Sequence and ack numbers are left at 0 - they are assigned by the channel when the
    ///  message is actually sent
    pub fn new(message_type: u16, flags: MessageFlags, payload: Vec<u8>) -> Result<Message, ArqError> {
        Self::check_payload_len(&payload)?;
        Ok(Message {
            message_type,
            sequence: 0,
            ack: 0,
            flags,
            payload,
        })
    }

    pub fn ack_only(sequence: u32, ack: u32) -> Message {
        Message {
            message_type: 0,
            sequence,
            ack,
            flags: MessageFlags::ACK,
            payload: Vec::new(),
        }
    }

    /// A keepalive probe. `echo` marks the probe as returned to its originator (payload `[1]`),
    ///  otherwise it is a fresh probe that the peer should echo (payload `[0]`).
    pub fn ping(probe_id: u32, echo: bool) -> Message {
        Message {
            message_type: 0,
            sequence: probe_id,
            ack: 0,
            flags: MessageFlags::PING,
            payload: vec![u8::from(echo)],
        }
    }

    /// A ping that was received from its originator's peer, i.e. a response to a probe
    pub fn is_echoed_ping(&self) -> bool {
        self.is_ping() && self.payload.first().is_some_and(|b| *b != 0)
    }

    pub fn end() -> Message {
        Message {
            message_type: 0,
            sequence: 0,
            ack: 0,
            flags: MessageFlags::END,
            payload: Vec::new(),
        }
    }

    fn check_payload_len(payload: &[u8]) -> Result<(), ArqError> {
        if payload.len() > Self::MAX_PAYLOAD_LEN {
            return Err(ArqError::OversizedPayload {
                len: payload.len(),
                max: Self::MAX_PAYLOAD_LEN,
            });
        }
        Ok(())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Result<Message, ArqError> {
        Self::check_payload_len(&payload)?;
        self.payload = payload;
        Ok(self)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(MessageFlags::ACK)
    }
    pub fn is_init(&self) -> bool {
        self.flags.contains(MessageFlags::INIT)
    }
    pub fn is_end(&self) -> bool {
        self.flags.contains(MessageFlags::END)
    }
    pub fn is_ping(&self) -> bool {
        self.flags.contains(MessageFlags::PING)
    }

    pub fn same_sequence(&self, other: &Message) -> bool {
        self.sequence == other.sequence
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.ack);
        buf.put_u8(self.flags.bits());
        buf.put_u16_le(self.message_type);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf
    }

    /// Any byte sequence of at least header length is accepted; the payload is not validated
    pub fn deser(mut buf: &[u8]) -> Result<Message, ArqError> {
        if buf.len() < Self::HEADER_LEN {
            return Err(ArqError::MalformedHeader {
                len: buf.len(),
                min: Self::HEADER_LEN,
            });
        }

        let sequence = buf.get_u32_le();
        let ack = buf.get_u32_le();
        let flags = MessageFlags::from_bits_truncate(buf.get_u8());
        let message_type = buf.get_u16_le();

        Ok(Message {
            message_type,
            sequence,
            ack,
            flags,
            payload: buf.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(7, 1, 2, MessageFlags::empty(), vec![], vec![1,0,0,0, 2,0,0,0, 0, 7,0])]
    #[case::ack(0, 0x01020304, 0xa0b0c0d0, MessageFlags::ACK, vec![], vec![4,3,2,1, 0xd0,0xc0,0xb0,0xa0, 1, 0,0])]
    #[case::init_with_payload(0x1234, 5, 6, MessageFlags::INIT, vec![9,8,7], vec![5,0,0,0, 6,0,0,0, 2, 0x34,0x12, 9,8,7])]
    #[case::end(1, 0, 0, MessageFlags::END, vec![], vec![0,0,0,0, 0,0,0,0, 4, 1,0])]
    #[case::ping(1, u32::MAX, 0, MessageFlags::PING, vec![1], vec![255,255,255,255, 0,0,0,0, 8, 1,0, 1])]
    fn test_ser(#[case] message_type: u16, #[case] sequence: u32, #[case] ack: u32, #[case] flags: MessageFlags, #[case] payload: Vec<u8>, #[case] expected: Vec<u8>) {
        let mut msg = Message::new(message_type, flags, payload).unwrap();
        msg.sequence = sequence;
        msg.ack = ack;

        let buf = msg.to_bytes();
        assert_eq!(buf, expected);
        assert_eq!(buf.len(), msg.serialized_len());

        let deser = Message::deser(&buf).unwrap();
        assert_eq!(deser, msg);
    }

    #[test]
    fn test_max_payload_roundtrip() {
        let mut msg = Message::new(3, MessageFlags::empty(), vec![0xab; Message::MAX_PAYLOAD_LEN]).unwrap();
        msg.sequence = 17;
        msg.ack = 4;

        let buf = msg.to_bytes();
        assert_eq!(buf.len(), Message::MAX_DATAGRAM_LEN);
        assert_eq!(Message::deser(&buf).unwrap(), msg);
    }

    #[test]
    fn test_oversized_payload() {
        match Message::new(3, MessageFlags::empty(), vec![0; Message::MAX_PAYLOAD_LEN + 1]) {
            Err(ArqError::OversizedPayload { len: 1501, max: 1500 }) => {}
            other => panic!("unexpected result {:?}", other),
        }

        let msg = Message::new(3, MessageFlags::PING, vec![]).unwrap();
        assert!(matches!(msg.with_payload(vec![0; 1501]), Err(ArqError::OversizedPayload { .. })));
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one(1)]
    #[case::ten(10)]
    fn test_deser_malformed(#[case] len: usize) {
        match Message::deser(&vec![0u8; len]) {
            Err(ArqError::MalformedHeader { len: actual, min: 11 }) => assert_eq!(actual, len),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_deser_header_only() {
        let msg = Message::deser(&[1,0,0,0, 2,0,0,0, 3, 4,0]).unwrap();
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg.ack, 2);
        assert_eq!(msg.flags, MessageFlags::ACK | MessageFlags::INIT);
        assert_eq!(msg.message_type, 4);
        assert!(msg.payload().is_empty());
    }

    #[test]
    fn test_ping() {
        let probe = Message::ping(12, false);
        assert_eq!(probe.to_bytes(), vec![12,0,0,0, 0,0,0,0, 8, 0,0, 0]);
        assert!(probe.is_ping());
        assert!(!probe.is_echoed_ping());

        let echo = Message::ping(12, true);
        assert_eq!(echo.payload(), &[1]);
        assert!(echo.is_echoed_ping());

        assert!(!Message::ack_only(1, 1).is_echoed_ping());
        assert!(!Message::deser(&[0,0,0,0, 0,0,0,0, 8, 0,0]).unwrap().is_echoed_ping());
    }

    #[test]
    fn test_deser_ignores_reserved_flag_bits() {
        let msg = Message::deser(&[0,0,0,0, 0,0,0,0, 0xf4, 0,0]).unwrap();
        assert_eq!(msg.flags, MessageFlags::END);
        assert!(msg.is_end());
        assert!(!msg.is_ack());
    }
}
