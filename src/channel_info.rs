use crate::error::ArqError;
use bytes::{Buf, BufMut};

/// The payload of INIT messages, used during the handshake to negotiate ports, window size and
///  loss tolerance between two hosts.
///
/// Wire format: seven 4-byte little endian fields, 28 bytes in total, in declaration order.
///  Ports are transmitted as 32 bit values but must be valid `u16` ports.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ChannelInfo {
    pub reliable_port: u16,
    pub no_reliable_port: u16,
    pub window_size: u32,
    pub reliable_percentage: u32,
    pub your_reliable_port: u16,
    pub your_no_reliable_port: u16,
    pub connection_id: u32,
}

impl ChannelInfo {
    pub const SERIALIZED_LEN: usize = 28;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.reliable_port.into());
        buf.put_u32_le(self.no_reliable_port.into());
        buf.put_u32_le(self.window_size);
        buf.put_u32_le(self.reliable_percentage);
        buf.put_u32_le(self.your_reliable_port.into());
        buf.put_u32_le(self.your_no_reliable_port.into());
        buf.put_u32_le(self.connection_id);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SERIALIZED_LEN);
        self.ser(&mut buf);
        buf
    }

    pub fn deser(mut buf: &[u8]) -> Result<ChannelInfo, ArqError> {
        if buf.len() != Self::SERIALIZED_LEN {
            return Err(ArqError::InvalidChannelInfo {
                len: buf.len(),
                expected: Self::SERIALIZED_LEN,
            });
        }

        let reliable_port = Self::port(buf.get_u32_le(), "reliable_port")?;
        let no_reliable_port = Self::port(buf.get_u32_le(), "no_reliable_port")?;
        let window_size = buf.get_u32_le();
        let reliable_percentage = buf.get_u32_le();
        let your_reliable_port = Self::port(buf.get_u32_le(), "your_reliable_port")?;
        let your_no_reliable_port = Self::port(buf.get_u32_le(), "your_no_reliable_port")?;
        let connection_id = buf.get_u32_le();

        Ok(ChannelInfo {
            reliable_port,
            no_reliable_port,
            window_size,
            reliable_percentage,
            your_reliable_port,
            your_no_reliable_port,
            connection_id,
        })
    }

    fn port(raw: u32, field: &'static str) -> Result<u16, ArqError> {
        u16::try_from(raw)
            .map_err(|_| ArqError::InvalidPort { field, value: raw })
    }
}
