//! Tests for the ReQL wire protocol implementation.

use super::protocol::*;
use crate::query::TermType;
use bytes::BytesMut;

// ============================================================================
// Query Encoding Tests
// ============================================================================

mod query_encoding {
    use super::*;

    #[test]
    fn test_continue_query_bytes() {
        // Query { type = CONTINUE, token = 5 }
        // - 0x08 0x02: field 1 varint = 2
        // - 0x18 0x05: field 3 varint = 5
        let encoded = Query::continue_stream(5).encode();
        assert_eq!(&encoded[..], &[0x08, 0x02, 0x18, 0x05]);
    }

    #[test]
    fn test_stop_query_bytes() {
        let encoded = Query::stop(300).encode();
        // 300 = 0b1_0010_1100 -> 0xAC 0x02
        assert_eq!(&encoded[..], &[0x08, 0x03, 0x18, 0xAC, 0x02]);
    }

    #[test]
    fn test_start_query_round_trip() {
        let term = Term::with_args(
            TermType::Add,
            vec![
                Term::datum(WireDatum::Num(1.0)),
                Term::datum(WireDatum::Num(2.0)),
            ],
        );
        let query = Query::start(
            42,
            term,
            vec![(
                "time_format".to_string(),
                Term::datum(WireDatum::Str("raw".to_string())),
            )],
        );

        let decoded = Query::decode(&query.encode()).unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn test_term_optargs_round_trip() {
        let mut term = Term::with_args(
            TermType::Table,
            vec![Term::datum(WireDatum::Str("users".to_string()))],
        );
        term.set_optarg("use_outdated", Term::datum(WireDatum::Bool(true)));

        let decoded = Term::decode(&term.encode()).unwrap();
        assert_eq!(decoded.term_type, TermType::Table);
        assert_eq!(
            decoded.optarg("use_outdated"),
            Some(&Term::datum(WireDatum::Bool(true)))
        );
    }

    #[test]
    fn test_set_optarg_replaces_existing_key() {
        let mut term = Term::new(TermType::Insert);
        term.set_optarg("durability", Term::datum(WireDatum::Str("soft".to_string())));
        term.set_optarg("durability", Term::datum(WireDatum::Str("hard".to_string())));

        assert_eq!(term.optargs.len(), 1);
        assert_eq!(
            term.optarg("durability"),
            Some(&Term::datum(WireDatum::Str("hard".to_string())))
        );
    }

    #[test]
    fn test_negative_token_uses_ten_byte_varint() {
        let encoded = Query::stop(-1).encode();
        // tag(1) + 1 byte + tag(3) + 10 bytes
        assert_eq!(encoded.len(), 2 + 1 + 10);
        assert_eq!(Query::decode(&encoded).unwrap().token, -1);
    }
}

// ============================================================================
// Response Decoding Tests
// ============================================================================

mod response_decoding {
    use super::*;

    #[test]
    fn test_atom_response_decoding() {
        // Response { type = SUCCESS_ATOM, token = 1, response = [Datum { R_NUM 3.0 }] }
        let mut data = vec![0x08, 0x01, 0x10, 0x01, 0x1A, 0x0B, 0x08, 0x03, 0x19];
        data.extend_from_slice(&3.0f64.to_le_bytes());

        let response = Response::decode(&data).unwrap();
        assert_eq!(response.response_type, ResponseType::SuccessAtom);
        assert_eq!(response.token, 1);
        assert_eq!(response.datums, vec![WireDatum::Num(3.0)]);
    }

    #[test]
    fn test_error_response_with_backtrace() {
        let response = Response {
            response_type: ResponseType::RuntimeError,
            token: 9,
            datums: vec![WireDatum::Str("Table `t` does not exist.".to_string())],
            backtrace: vec![Frame::Pos(0), Frame::Opt("index".to_string())],
        };

        let decoded = Response::decode(&response.encode()).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.response_type.is_error());
        assert_eq!(decoded.error_message(), "Table `t` does not exist.");
    }

    #[test]
    fn test_nested_datum_round_trip() {
        let datum = WireDatum::Object(vec![
            ("id".to_string(), WireDatum::Num(1.0)),
            ("tags".to_string(), WireDatum::Array(vec![
                WireDatum::Str("a".to_string()),
                WireDatum::Null,
                WireDatum::Bool(false),
            ])),
        ]);
        let response = Response::new(ResponseType::SuccessPartial, 3, vec![datum]);

        let decoded = Response::decode(&response.encode()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_unknown_response_type_is_protocol_error() {
        // type = 99
        let data = [0x08, 0x63, 0x10, 0x01];
        let err = Response::decode(&data).unwrap_err();
        assert!(err.to_string().contains("Unknown response type"));
    }

    #[test]
    fn test_truncated_datum_is_protocol_error() {
        // response field claims 11 bytes but only 2 follow
        let data = [0x08, 0x01, 0x10, 0x01, 0x1A, 0x0B, 0x08, 0x03];
        assert!(Response::decode(&data).is_err());
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut buf = Response::new(ResponseType::SuccessSequence, 2, vec![]).encode();
        // field 5 (profile), length-delimited, 2 bytes
        buf.extend_from_slice(&[0x2A, 0x02, 0xFF, 0xFF]);

        let decoded = Response::decode(&buf).unwrap();
        assert_eq!(decoded.response_type, ResponseType::SuccessSequence);
    }

    fn nested_array(levels: usize) -> WireDatum {
        let mut datum = WireDatum::Null;
        for _ in 0..levels {
            datum = WireDatum::Array(vec![datum]);
        }
        datum
    }

    #[test]
    fn test_deep_nesting_is_protocol_error() {
        let deep = Response::new(
            ResponseType::SuccessAtom,
            1,
            vec![nested_array(MAX_DECODE_DEPTH + 1)],
        );
        let err = Response::decode(&deep.encode()).unwrap_err();
        assert!(err.to_string().contains("Nesting deeper"));

        let mut term = Term::new(TermType::MakeArray);
        for _ in 0..MAX_DECODE_DEPTH + 1 {
            term = Term::with_args(TermType::MakeArray, vec![term]);
        }
        assert!(Term::decode(&term.encode()).is_err());
    }

    #[test]
    fn test_nesting_at_limit_decodes() {
        let datum = nested_array(MAX_DECODE_DEPTH);
        let back = WireDatum::decode(&datum.encode()).unwrap();
        assert_eq!(back, datum);
    }
}

// ============================================================================
// Framing Tests
// ============================================================================

mod framing {
    use super::*;

    #[test]
    fn test_magic_is_v0_1() {
        assert_eq!(PROTOCOL_MAGIC.to_le_bytes(), [0x36, 0xba, 0x61, 0x3f]);
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame(&Response::new(ResponseType::SuccessAtom, 1, vec![])));
        buf.extend_from_slice(&frame(&Response::new(ResponseType::SuccessAtom, 2, vec![])));

        let first = split_frame(&mut buf).unwrap().unwrap();
        let second = split_frame(&mut buf).unwrap().unwrap();
        assert!(split_frame(&mut buf).unwrap().is_none());

        assert_eq!(Response::decode(&first).unwrap().token, 1);
        assert_eq!(Response::decode(&second).unwrap().token, 2);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(split_frame(&mut buf).is_err());
    }
}
