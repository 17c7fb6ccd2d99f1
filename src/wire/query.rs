use bson::Document;

use super::{
    flags::QueryFlags,
    header::{Header, OpCode},
    util::{next_request_id, write_cstring},
};
use crate::error::{Error, Result};

/// Represents a wire protocol OP_QUERY operation.
#[derive(Debug)]
pub(crate) struct Query {
    pub(crate) request_id: i32,
    pub(crate) flags: QueryFlags,
    pub(crate) full_collection_name: String,
    pub(crate) num_to_skip: i32,
    pub(crate) num_to_return: i32,
    pub(crate) query: Document,
}

impl Query {
    /// Creates a single-batch query against `full_collection_name` with a fresh request id.
    pub(crate) fn new(
        full_collection_name: impl Into<String>,
        query: Document,
        flags: QueryFlags,
    ) -> Self {
        Self {
            request_id: next_request_id(),
            flags,
            full_collection_name: full_collection_name.into(),
            num_to_skip: 0,
            num_to_return: -1,
            query,
        }
    }

    /// Serializes the query, header included.
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.num_to_skip.to_le_bytes());
        body.extend_from_slice(&self.num_to_return.to_le_bytes());
        self.query.to_writer(&mut body)?;

        let length = i32::try_from(Header::LENGTH + body.len())
            .map_err(|_| Error::invalid_argument("query exceeds the maximum message size"))?;
        let header = Header {
            length,
            request_id: self.request_id,
            response_to: 0,
            op_code: OpCode::Query,
        };

        let mut bytes = Vec::with_capacity(Header::LENGTH + body.len());
        header.write_to(&mut bytes);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Reads a query the way a server would. Only the mock nodes used in tests need this.
    #[cfg(test)]
    pub(crate) async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        use crate::runtime::SyncLittleEndianRead;

        let header = Header::read_from(reader).await?;
        if header.op_code != OpCode::Query {
            return Err(Error::invalid_response(format!(
                "Expected an OP_QUERY, got {:?}",
                header.op_code
            )));
        }
        let body = header.read_body(reader).await?;

        let mut cursor = std::io::Cursor::new(body.as_slice());
        let flags = QueryFlags::from_bits_truncate(cursor.read_u32_sync()?);
        let full_collection_name = cursor.read_cstring_sync()?;
        let num_to_skip = cursor.read_i32_sync()?;
        let num_to_return = cursor.read_i32_sync()?;
        let query = Document::from_reader(&mut cursor)?;

        Ok(Self {
            request_id: header.request_id,
            flags,
            full_collection_name,
            num_to_skip,
            num_to_return,
            query,
        })
    }
}
