use std::io::Cursor;

use bson::Document;
use tokio::io::AsyncRead;

use super::{
    flags::ResponseFlags,
    header::{Header, OpCode},
};
use crate::{
    error::{Error, Result},
    runtime::SyncLittleEndianRead,
};

/// flags + cursor id + starting from + number returned
const REPLY_PREAMBLE_LENGTH: usize = 4 + 8 + 4 + 4;

/// The reply a node sent back for a command.
#[derive(Clone, Debug)]
pub struct Reply {
    pub(crate) response_to: i32,
    pub(crate) response_flags: ResponseFlags,
    pub(crate) cursor_id: i64,
    pub(crate) docs: Vec<Document>,
}

impl Reply {
    /// The documents contained in the reply.
    pub fn documents(&self) -> &[Document] {
        &self.docs
    }

    /// Consumes the reply, returning its documents.
    pub fn into_documents(self) -> Vec<Document> {
        self.docs
    }

    /// The cursor id the node returned; zero when there are no further batches.
    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    /// Reads bytes from `reader` and deserializes them into a Reply.
    pub(crate) async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let header = Header::read_from(reader).await?;
        if header.op_code != OpCode::Reply {
            return Err(Error::invalid_response(format!(
                "Expected an OP_REPLY, got {:?}",
                header.op_code
            )));
        }
        let body = header.read_body(reader).await?;
        Self::parse(&header, &body)
    }

    fn parse(header: &Header, body: &[u8]) -> Result<Self> {
        if body.len() < REPLY_PREAMBLE_LENGTH {
            return Err(Error::invalid_response(format!(
                "The server indicated that the reply would be {} bytes long, which is too short \
                 for an OP_REPLY",
                header.length
            )));
        }

        let mut reader = Cursor::new(body);
        let response_flags = ResponseFlags::from_bits_truncate(reader.read_u32_sync()?);
        let cursor_id = reader.read_i64_sync()?;
        let _starting_from = reader.read_i32_sync()?;
        let num_returned = reader.read_i32_sync()?;

        let mut docs = Vec::new();
        while (reader.position() as usize) < body.len() {
            let doc = Document::from_reader(&mut reader).map_err(|e| {
                Error::invalid_response(format!(
                    "The server indicated that the reply would be {} bytes long, but its \
                     documents could not be read: {e}",
                    header.length
                ))
            })?;
            docs.push(doc);
        }

        if usize::try_from(num_returned).ok() != Some(docs.len()) {
            return Err(Error::invalid_response(format!(
                "The server indicated that the reply would contain {} documents, but it instead \
                 contained {}",
                num_returned,
                docs.len()
            )));
        }

        Ok(Self {
            response_to: header.response_to,
            response_flags,
            cursor_id,
            docs,
        })
    }

    /// The error the node reported through the `QUERY_FAILURE` flag, if any.
    pub(crate) fn query_failure(&self) -> Option<Error> {
        if !self.response_flags.contains(ResponseFlags::QUERY_FAILURE) {
            return None;
        }
        let doc = self.docs.first().cloned().unwrap_or_default();
        let message = doc
            .get_str("$err")
            .unwrap_or("query failure reported without a message")
            .to_string();
        Some(Error::operation_failure(message).with_server_response(doc))
    }

    /// Returns the only document of a command reply.
    pub(crate) fn into_single_document(self) -> Result<Document> {
        let count = self.docs.len();
        let mut docs = self.docs.into_iter();
        match (docs.next(), docs.next()) {
            (Some(doc), None) => Ok(doc),
            _ => Err(Error::operation_failure(format!(
                "expected exactly one reply document, got {count}"
            ))),
        }
    }
}

#[cfg(test)]
impl Reply {
    pub(crate) fn new(response_to: i32, docs: Vec<Document>) -> Self {
        Self {
            response_to,
            response_flags: ResponseFlags::empty(),
            cursor_id: 0,
            docs,
        }
    }

    /// Serializes the reply the way a server would.
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.response_flags.bits().to_le_bytes());
        body.extend_from_slice(&self.cursor_id.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        let num_returned = i32::try_from(self.docs.len())
            .map_err(|_| Error::internal("too many documents in reply"))?;
        body.extend_from_slice(&num_returned.to_le_bytes());
        for doc in &self.docs {
            doc.to_writer(&mut body)?;
        }

        let length = i32::try_from(Header::LENGTH + body.len())
            .map_err(|_| Error::internal("reply exceeds the maximum message size"))?;
        let header = Header {
            length,
            request_id: super::util::next_request_id(),
            response_to: self.response_to,
            op_code: OpCode::Reply,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }
}
