use std::io::Read;

use crate::error::Result;

pub(crate) trait SyncLittleEndianRead: Read {
    /// Read an `i32` in little-endian order.
    fn read_i32_sync(&mut self) -> Result<i32> {
        let mut buf: [u8; 4] = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read a `u32` in little-endian order.
    fn read_u32_sync(&mut self) -> Result<u32> {
        let mut buf: [u8; 4] = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read an `i64` in little-endian order.
    fn read_i64_sync(&mut self) -> Result<i64> {
        let mut buf: [u8; 8] = [0; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Read bytes up to (and discarding) a null terminator, decoding them as UTF-8.
    #[cfg(test)]
    fn read_cstring_sync(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        let mut buf: [u8; 1] = [0; 1];
        loop {
            self.read_exact(&mut buf)?;
            if buf[0] == 0 {
                break;
            }
            bytes.push(buf[0]);
        }
        String::from_utf8(bytes).map_err(|e| crate::error::Error::invalid_response(e.to_string()))
    }
}

impl<R: Read> SyncLittleEndianRead for R {}
