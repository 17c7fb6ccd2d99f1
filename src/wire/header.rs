use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// The largest message a server is expected to send.
pub(crate) const MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;

/// The wire protocol op codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OpCode {
    Reply = 1,
    Query = 2004,
}

impl OpCode {
    /// Attempt to infer the op code based on the numeric value.
    fn from_i32(i: i32) -> Result<Self> {
        match i {
            1 => Ok(OpCode::Reply),
            2004 => Ok(OpCode::Query),
            other => Err(Error::invalid_response(format!(
                "Invalid wire protocol opcode: {other}"
            ))),
        }
    }
}

/// The header for any wire protocol message.
#[derive(Debug)]
pub(crate) struct Header {
    pub(crate) length: i32,
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
    pub(crate) op_code: OpCode,
}

impl Header {
    pub(crate) const LENGTH: usize = 4 * std::mem::size_of::<i32>();

    /// Serializes the Header and appends the bytes to `buf`.
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.length.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.response_to.to_le_bytes());
        buf.extend_from_slice(&(self.op_code as i32).to_le_bytes());
    }

    /// Reads bytes from `reader` and deserializes them into a header.
    pub(crate) async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let length = reader.read_i32_le().await?;
        let request_id = reader.read_i32_le().await?;
        let response_to = reader.read_i32_le().await?;
        let op_code = OpCode::from_i32(reader.read_i32_le().await?)?;
        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }

    /// Reads the rest of the message this header announces.
    pub(crate) async fn read_body<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<Vec<u8>> {
        if self.length < Self::LENGTH as i32 || self.length > MAX_MESSAGE_SIZE_BYTES {
            return Err(Error::invalid_response(format!(
                "Message length {} is outside of the valid range",
                self.length
            )));
        }

        #[allow(clippy::cast_sign_loss)]
        let mut body = vec![0u8; self.length as usize - Self::LENGTH];
        reader.read_exact(&mut body).await?;
        Ok(body)
    }
}
