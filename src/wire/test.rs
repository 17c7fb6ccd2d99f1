use pretty_assertions::assert_eq;

use super::{
    flags::ResponseFlags,
    header::{Header, OpCode},
    Query,
    QueryFlags,
    Reply,
};
use crate::{bson::doc, error::ErrorKind};

fn raw_reply(flags: u32, num_returned: i32, docs: &[crate::bson::Document]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&flags.to_le_bytes());
    body.extend_from_slice(&0i64.to_le_bytes());
    body.extend_from_slice(&0i32.to_le_bytes());
    body.extend_from_slice(&num_returned.to_le_bytes());
    for doc in docs {
        doc.to_writer(&mut body).unwrap();
    }

    let mut bytes = Vec::new();
    Header {
        length: (Header::LENGTH + body.len()) as i32,
        request_id: 7,
        response_to: 3,
        op_code: OpCode::Reply,
    }
    .write_to(&mut bytes);
    bytes.extend_from_slice(&body);
    bytes
}

#[tokio::test]
async fn query_is_readable_by_a_server() {
    let query = Query::new(
        "admin.$cmd",
        doc! { "ismaster": 1 },
        QueryFlags::SECONDARY_OK,
    );
    let bytes = query.to_bytes().unwrap();
    assert_eq!(
        i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize,
        bytes.len()
    );

    let read = Query::read_from(&mut bytes.as_slice()).await.unwrap();
    assert_eq!(read.request_id, query.request_id);
    assert_eq!(read.flags, QueryFlags::SECONDARY_OK);
    assert_eq!(read.full_collection_name, "admin.$cmd");
    assert_eq!(read.num_to_return, -1);
    assert_eq!(read.query, doc! { "ismaster": 1 });
}

#[tokio::test]
async fn reply_documents_are_read() {
    let bytes = raw_reply(0, 2, &[doc! { "a": 1 }, doc! { "b": 2 }]);
    let reply = Reply::read_from(&mut bytes.as_slice()).await.unwrap();

    assert_eq!(reply.response_to, 3);
    assert_eq!(reply.documents(), &[doc! { "a": 1 }, doc! { "b": 2 }]);
    assert!(reply.query_failure().is_none());
}

#[tokio::test]
async fn reply_with_wrong_document_count() {
    let bytes = raw_reply(0, 3, &[doc! { "a": 1 }]);
    let error = Reply::read_from(&mut bytes.as_slice()).await.unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidResponse { .. }));
}

#[tokio::test]
async fn reply_too_short() {
    let mut bytes = Vec::new();
    Header {
        length: Header::LENGTH as i32 + 4,
        request_id: 1,
        response_to: 0,
        op_code: OpCode::Reply,
    }
    .write_to(&mut bytes);
    bytes.extend_from_slice(&0u32.to_le_bytes());

    let error = Reply::read_from(&mut bytes.as_slice()).await.unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidResponse { .. }));
}

#[tokio::test]
async fn reply_with_unknown_opcode() {
    let mut bytes = raw_reply(0, 0, &[]);
    bytes[12..16].copy_from_slice(&2013i32.to_le_bytes());

    let error = Reply::read_from(&mut bytes.as_slice()).await.unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidResponse { .. }));
}

#[tokio::test]
async fn query_failure_flag_is_an_operation_failure() {
    let bytes = raw_reply(
        ResponseFlags::QUERY_FAILURE.bits(),
        1,
        &[doc! { "$err": "not master", "code": 10107 }],
    );
    let reply = Reply::read_from(&mut bytes.as_slice()).await.unwrap();

    let error = reply.query_failure().unwrap();
    assert!(error.is_operation_failure());
    assert_eq!(
        error.server_response(),
        Some(&doc! { "$err": "not master", "code": 10107 })
    );
}

#[test]
fn single_document_reply() {
    let reply = Reply::new(0, vec![doc! { "ok": 1 }]);
    assert_eq!(reply.into_single_document().unwrap(), doc! { "ok": 1 });

    let empty = Reply::new(0, Vec::new());
    assert!(empty.into_single_document().unwrap_err().is_operation_failure());

    let two = Reply::new(0, vec![doc! { "ok": 1 }, doc! { "ok": 1 }]);
    assert!(two.into_single_document().unwrap_err().is_operation_failure());
}
