//! Session and cursor tests.
//!
//! Most tests run against an in-process mock server that speaks the
//! handshake and framing and answers each query from a scripted handler.
//! The `integration` module needs a real server on localhost:28015.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::wire::protocol::frame;
use crate::wire::{Frame, Message, Query, QueryType, Response, ResponseType, WireDatum, PROTOCOL_MAGIC};
use crate::*;

// ============================================================================
// Mock Server
// ============================================================================

enum Reply {
    Now(Response),
    After(Duration, Response),
}

type Handler = Arc<dyn Fn(&Query) -> Vec<Reply> + Send + Sync>;

struct MockServer {
    address: String,
    queries: Arc<Mutex<Vec<Query>>>,
    accepted: Arc<AtomicUsize>,
}

impl MockServer {
    async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Query) -> Vec<Reply> + Send + Sync + 'static,
    {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let queries = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let handler: Handler = Arc::new(handler);

        let (log, count) = (queries.clone(), accepted.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, handler.clone(), log.clone()));
            }
        });

        Self {
            address,
            queries,
            accepted,
        }
    }

    async fn session(&self) -> Session {
        Session::connect(&self.address, "test").await.unwrap()
    }

    fn queries(&self) -> Vec<Query> {
        self.queries.lock().clone()
    }

    fn count(&self, query_type: QueryType) -> usize {
        self.queries
            .lock()
            .iter()
            .filter(|q| q.query_type == query_type)
            .count()
    }
}

async fn serve(mut stream: TcpStream, handler: Handler, queries: Arc<Mutex<Vec<Query>>>) {
    let mut magic = [0u8; 4];
    if stream.read_exact(&mut magic).await.is_err() || u32::from_le_bytes(magic) != PROTOCOL_MAGIC {
        return;
    }

    loop {
        let mut len = [0u8; 4];
        if stream.read_exact(&mut len).await.is_err() {
            return;
        }
        let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
        if stream.read_exact(&mut payload).await.is_err() {
            return;
        }
        let Ok(query) = Query::decode(&payload) else {
            return;
        };
        queries.lock().push(query.clone());

        for reply in handler(&query) {
            let response = match reply {
                Reply::Now(response) => response,
                Reply::After(delay, response) => {
                    tokio::time::sleep(delay).await;
                    response
                }
            };
            if stream.write_all(&frame(&response)).await.is_err() {
                return;
            }
        }
    }
}

/// Route driver events to the test output; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn num(n: f64) -> WireDatum {
    WireDatum::Num(n)
}

fn nums(values: &[f64]) -> Vec<WireDatum> {
    values.iter().map(|n| num(*n)).collect()
}

fn reply(query: &Query, response_type: ResponseType, datums: Vec<WireDatum>) -> Vec<Reply> {
    vec![Reply::Now(Response::new(response_type, query.token, datums))]
}

/// Replies with a single atom to START and acknowledges STOP.
fn atom_server(datum: WireDatum) -> impl Fn(&Query) -> Vec<Reply> + Send + Sync + 'static {
    move |q| match q.query_type {
        QueryType::Start => reply(q, ResponseType::SuccessAtom, vec![datum.clone()]),
        _ => reply(q, ResponseType::SuccessSequence, vec![]),
    }
}

/// Streams one partial batch and acknowledges STOP.
fn partial_server(q: &Query) -> Vec<Reply> {
    match q.query_type {
        QueryType::Start => reply(q, ResponseType::SuccessPartial, nums(&[1.0])),
        QueryType::Continue => reply(q, ResponseType::SuccessPartial, nums(&[2.0])),
        QueryType::Stop => reply(q, ResponseType::SuccessSequence, vec![]),
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Query Round-trip Tests
// ============================================================================

mod round_trip {
    use super::*;

    #[tokio::test]
    async fn test_atom_query() {
        let server = MockServer::start(atom_server(num(3.0))).await;
        let session = server.session().await;

        let add = expr(1).add(2);
        let value: i64 = add.run(&session).await.one().await.unwrap();
        assert_eq!(value, 3);

        let sent = server.queries();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].query_type, QueryType::Start);
        let expected = query::compile(&Context::new("test"), &add).unwrap();
        assert_eq!(sent[0].term.as_ref(), Some(&expected));
        assert!(sent[0].global_optargs.is_empty());
    }

    #[tokio::test]
    async fn test_tokens_strictly_increase() {
        let server = MockServer::start(atom_server(num(1.0))).await;
        let session = server.session().await;

        for _ in 0..4 {
            session.run(&expr(1)).await.exec().await.unwrap();
        }

        let tokens: Vec<i64> = server.queries().iter().map(|q| q.token).collect();
        assert_eq!(tokens.len(), 4);
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_scan_into_structs() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Row {
            id: i64,
            name: String,
        }

        let server = MockServer::start(|q| {
            let rows = (1..=2)
                .map(|i| {
                    WireDatum::Object(vec![
                        ("id".to_string(), num(i as f64)),
                        ("name".to_string(), WireDatum::Str(format!("row{}", i))),
                    ])
                })
                .collect();
            reply(q, ResponseType::SuccessSequence, rows)
        })
        .await;
        let session = server.session().await;

        let mut cursor = table("t").run(&session).await;
        assert_eq!(cursor.shape(), Some(ResponseShape::Sequence));
        assert!(cursor.next().await);
        let first: Row = cursor.scan().unwrap();
        assert_eq!(first, Row { id: 1, name: "row1".to_string() });
        assert!(cursor.next().await);
        assert_eq!(cursor.current().and_then(|d| d.get("name")), Some(&Datum::from("row2")));
        assert!(!cursor.next().await);
        assert!(cursor.err().is_none());
    }

    #[tokio::test]
    async fn test_times_are_converted_unless_raw() {
        let server = MockServer::start(|q| {
            let time = WireDatum::Object(vec![
                ("$reql_type$".to_string(), WireDatum::Str("TIME".to_string())),
                ("epoch_time".to_string(), num(1_000_000_000.5)),
                ("timezone".to_string(), WireDatum::Str("+02:00".to_string())),
            ]);
            reply(q, ResponseType::SuccessAtom, vec![time])
        })
        .await;
        let session = server.session().await;

        let mut cursor = now().run(&session).await;
        assert!(cursor.next().await);
        let time = cursor.current().and_then(Datum::as_time).unwrap();
        assert_eq!(time.timestamp_millis(), 1_000_000_000_500);
        assert_eq!(time.offset().local_minus_utc(), 7200);

        let mut cursor = now().time_format("raw").run(&session).await;
        assert!(cursor.next().await);
        assert!(cursor.current().and_then(|d| d.get("$reql_type$")).is_some());

        let raw_query = &server.queries()[1];
        assert_eq!(raw_query.global_optargs.len(), 1);
        assert_eq!(raw_query.global_optargs[0].0, "time_format");
    }
}

// ============================================================================
// Cursor Tests
// ============================================================================

mod cursors {
    use super::*;

    #[tokio::test]
    async fn test_all_follows_continuations() {
        let continues = AtomicUsize::new(0);
        let server = MockServer::start(move |q| match q.query_type {
            QueryType::Start => reply(q, ResponseType::SuccessPartial, nums(&[1.0, 2.0])),
            QueryType::Continue => {
                if continues.fetch_add(1, Ordering::SeqCst) == 0 {
                    reply(q, ResponseType::SuccessPartial, nums(&[3.0]))
                } else {
                    reply(q, ResponseType::SuccessSequence, nums(&[4.0, 5.0]))
                }
            }
            QueryType::Stop => reply(q, ResponseType::SuccessSequence, vec![]),
        })
        .await;
        let session = server.session().await;

        let mut cursor = table("t").run(&session).await;
        assert_eq!(cursor.shape(), Some(ResponseShape::Partial));
        assert_eq!(session.idle_connections(), 0);

        let values: Vec<i64> = cursor.all().await.unwrap();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert_eq!(server.count(QueryType::Continue), 2);
        assert_eq!(server.count(QueryType::Stop), 0);
        assert_eq!(session.idle_connections(), 1);

        let tokens: Vec<i64> = server.queries().iter().map(|q| q.token).collect();
        assert!(tokens.iter().all(|t| *t == tokens[0]));
    }

    #[tokio::test]
    async fn test_close_sends_stop_once() {
        let server = MockServer::start(partial_server).await;
        let session = server.session().await;

        let mut cursor = table("t").run(&session).await;
        assert!(cursor.next().await);
        cursor.close().await.unwrap();
        cursor.close().await.unwrap();

        let sent = server.queries();
        let stops: Vec<&Query> = sent.iter().filter(|q| q.query_type == QueryType::Stop).collect();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].token, sent[0].token);
        assert_eq!(session.idle_connections(), 1);
        assert!(!cursor.next().await);
    }

    #[tokio::test]
    async fn test_drop_stops_stream() {
        let server = MockServer::start(partial_server).await;
        let session = server.session().await;

        {
            let mut cursor = table("t").run(&session).await;
            assert!(cursor.next().await);
        }

        assert!(wait_until(|| server.count(QueryType::Stop) == 1).await);
        assert!(wait_until(|| session.idle_connections() == 1).await);
    }

    #[tokio::test]
    async fn test_one_on_null_atom_is_no_such_row() {
        let server = MockServer::start(atom_server(WireDatum::Null)).await;
        let session = server.session().await;

        let result = table("t").get(999).run(&session).await.one::<Datum>().await;
        assert!(matches!(result, Err(Error::NoSuchRow)));
        assert_eq!(session.idle_connections(), 1);
    }

    #[tokio::test]
    async fn test_one_on_sequence_is_wrong_response_type() {
        let server = MockServer::start(|q| reply(q, ResponseType::SuccessSequence, nums(&[1.0, 2.0]))).await;
        let session = server.session().await;

        let result = table("t").run(&session).await.one::<i64>().await;
        match result {
            Err(Error::WrongResponseType { expected, actual }) => {
                assert_eq!(expected, "atom");
                assert_eq!(actual, "sequence");
            }
            other => panic!("expected wrong response type, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_on_atom_array() {
        let server = MockServer::start(atom_server(WireDatum::Array(nums(&[1.0, 2.0, 3.0])))).await;
        let session = server.session().await;

        let values: Vec<u8> = expr(vec![1, 1, 2, 3, 3])
            .distinct()
            .run(&session)
            .await
            .all()
            .await
            .unwrap();
        assert_eq!(values, vec![1, 2, 3]);

        let server = MockServer::start(atom_server(WireDatum::Null)).await;
        let session = server.session().await;
        let values: Vec<u8> = expr(()).run(&session).await.all().await.unwrap();
        assert!(values.is_empty());
    }
}

// ============================================================================
// Error Response Tests
// ============================================================================

mod error_responses {
    use super::*;

    fn error_server(response_type: ResponseType) -> impl Fn(&Query) -> Vec<Reply> + Send + Sync {
        move |q| {
            let mut response = Response::new(
                response_type,
                q.token,
                vec![WireDatum::Str("Table `t` does not exist.".to_string())],
            );
            response.backtrace = vec![Frame::Pos(0)];
            vec![Reply::Now(response)]
        }
    }

    #[tokio::test]
    async fn test_runtime_error_is_sticky() {
        let server = MockServer::start(error_server(ResponseType::RuntimeError)).await;
        let session = server.session().await;

        let mut cursor = table("t").count().run(&session).await;
        match cursor.err() {
            Some(Error::Runtime(e)) => {
                assert_eq!(e.message, "Table `t` does not exist.");
                assert_eq!(e.backtrace, vec![Frame::Pos(0)]);
                assert_eq!(e.query, r#"r.table("t").count()"#);
            }
            other => panic!("expected runtime error, got {:?}", other),
        }

        assert!(!cursor.next().await);
        assert!(matches!(cursor.exec().await, Err(Error::Runtime(_))));
        assert!(matches!(cursor.all::<i64>().await, Err(Error::Runtime(_))));
        assert_eq!(session.idle_connections(), 1);
    }

    #[tokio::test]
    async fn test_compile_error_is_bad_query() {
        let server = MockServer::start(error_server(ResponseType::CompileError)).await;
        let session = server.session().await;

        let cursor = table("t").run(&session).await;
        assert!(matches!(cursor.err(), Some(Error::BadQuery(_))));
    }

    #[tokio::test]
    async fn test_client_error_is_broken_client() {
        let server = MockServer::start(error_server(ResponseType::ClientError)).await;
        let session = server.session().await;

        let cursor = table("t").run(&session).await;
        let err = cursor.err().expect("client error is latched");
        assert!(matches!(err, Error::BrokenClient { .. }));
        assert_eq!(
            err.response().map(|r| r.response_type),
            Some(ResponseType::ClientError)
        );
    }

    #[tokio::test]
    async fn test_client_side_failure_sends_nothing() {
        let server = MockServer::start(atom_server(num(1.0))).await;
        let session = server.session().await;

        let cursor = expr(1).insert(obj! { "a" => 1 }).run(&session).await;
        match cursor.err() {
            Some(Error::BadClient { query, .. }) => {
                assert_eq!(query, r#"r.expr(1).insert({"a": 1})"#);
            }
            other => panic!("expected bad client, got {:?}", other),
        }
        assert!(server.queries().is_empty());
    }
}

// ============================================================================
// Transport Tests
// ============================================================================

mod transport {
    use super::*;

    #[tokio::test]
    async fn test_stale_tokens_are_skipped() {
        let server = MockServer::start(|q| {
            vec![
                Reply::Now(Response::new(ResponseType::SuccessAtom, q.token - 1, vec![num(0.0)])),
                Reply::Now(Response::new(ResponseType::SuccessAtom, q.token, vec![num(7.0)])),
            ]
        })
        .await;
        let session = server.session().await;

        let value: i64 = expr(7).run(&session).await.one().await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_future_token_is_broken_client() {
        let server = MockServer::start(|q| {
            vec![Reply::Now(Response::new(
                ResponseType::SuccessAtom,
                q.token + 1,
                vec![num(1.0)],
            ))]
        })
        .await;
        let session = server.session().await;

        let cursor = expr(1).run(&session).await;
        assert!(matches!(cursor.err(), Some(Error::BrokenClient { .. })));
        assert_eq!(session.idle_connections(), 0);
    }

    #[tokio::test]
    async fn test_timeout_discards_connection() {
        let server = MockServer::start(|q| {
            vec![Reply::After(
                Duration::from_millis(500),
                Response::new(ResponseType::SuccessAtom, q.token, vec![num(1.0)]),
            )]
        })
        .await;
        let mut session = server.session().await;
        session.set_timeout(Duration::from_millis(50));
        assert_eq!(session.idle_connections(), 1);

        let mut cursor = expr(1).run(&session).await;
        assert!(matches!(cursor.err(), Some(Error::Timeout)));
        assert!(matches!(cursor.one::<i64>().await, Err(Error::Timeout)));
        assert_eq!(session.idle_connections(), 0);
    }

    #[tokio::test]
    async fn test_continue_timeout_discards_connection() {
        let server = MockServer::start(|q| match q.query_type {
            QueryType::Start => reply(q, ResponseType::SuccessPartial, nums(&[1.0])),
            QueryType::Continue => vec![Reply::After(
                Duration::from_millis(500),
                Response::new(ResponseType::SuccessSequence, q.token, nums(&[2.0])),
            )],
            QueryType::Stop => reply(q, ResponseType::SuccessSequence, vec![]),
        })
        .await;
        let mut session = server.session().await;
        session.set_timeout(Duration::from_millis(50));

        let mut cursor = table("t").run(&session).await;
        assert!(cursor.next().await);
        assert!(!cursor.next().await);
        assert!(matches!(cursor.err(), Some(Error::Timeout)));
        assert!(matches!(cursor.all::<i64>().await, Err(Error::Timeout)));
        assert_eq!(session.idle_connections(), 0);
    }

    #[tokio::test]
    async fn test_stop_timeout_discards_connection() {
        let server = MockServer::start(|q| match q.query_type {
            QueryType::Stop => vec![Reply::After(
                Duration::from_millis(500),
                Response::new(ResponseType::SuccessSequence, q.token, vec![]),
            )],
            _ => partial_server(q),
        })
        .await;
        let mut session = server.session().await;
        session.set_timeout(Duration::from_millis(50));

        let mut cursor = table("t").run(&session).await;
        assert!(cursor.next().await);
        assert!(matches!(cursor.close().await, Err(Error::Timeout)));
        assert_eq!(server.count(QueryType::Stop), 1);
        assert_eq!(session.idle_connections(), 0);
    }

    #[tokio::test]
    async fn test_timeout_applies_to_fresh_connections() {
        let server = MockServer::start(|q| {
            vec![Reply::After(
                Duration::from_millis(500),
                Response::new(ResponseType::SuccessAtom, q.token, vec![num(1.0)]),
            )]
        })
        .await;
        let config = SessionConfig::new(&server.address)
            .max_idle(0)
            .timeout(Duration::from_millis(50));
        let session = Session::connect_with_config(config).await.unwrap();
        assert_eq!(session.idle_connections(), 0);

        let cursor = expr(1).run(&session).await;
        assert!(matches!(cursor.err(), Some(Error::Timeout)));
        assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pool_keeps_at_most_max_idle() {
        let server = MockServer::start(partial_server).await;
        let config = SessionConfig::new(&server.address).max_idle(2);
        let session = Session::connect_with_config(config).await.unwrap();

        let mut cursors = Vec::new();
        for _ in 0..4 {
            cursors.push(table("t").run(&session).await);
        }
        assert_eq!(session.idle_connections(), 0);
        assert_eq!(server.accepted.load(Ordering::SeqCst), 4);

        for mut cursor in cursors {
            cursor.close().await.unwrap();
        }
        assert_eq!(session.idle_connections(), 2);
    }

    #[tokio::test]
    async fn test_serial_queries_reuse_one_connection() {
        let server = MockServer::start(atom_server(num(1.0))).await;
        let session = server.session().await;

        for _ in 0..8 {
            session.run(&expr(1)).await.exec().await.unwrap();
        }
        assert!(session.idle_connections() <= 5);
        assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_session_refuses_queries() {
        let server = MockServer::start(atom_server(num(1.0))).await;
        let session = server.session().await;

        session.close().await.unwrap();
        assert!(session.is_closed());
        assert_eq!(session.idle_connections(), 0);
        session.close().await.unwrap();

        let cursor = expr(1).run(&session).await;
        assert!(matches!(cursor.err(), Some(Error::SessionClosed)));

        session.reconnect().await.unwrap();
        assert!(!session.is_closed());
        let value: i64 = expr(1).run(&session).await.one().await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(Session::connect(&address, "test").await.is_err());
    }
}

// ============================================================================
// Integration Tests (require a server on localhost:28015)
// ============================================================================

#[cfg(feature = "server-integration-tests")]
mod integration {
    use super::*;

    const TABLE: &str = "reqlkit_t";

    async fn session() -> Session {
        init_tracing();
        Session::connect("localhost:28015", "test")
            .await
            .expect("server on localhost:28015")
    }

    /// Ten rows `{id: i, num: 20 - i}`.
    async fn seed(session: &Session) {
        let _ = table_create(TABLE).run(session).await.exec().await;
        table(TABLE).delete().run(session).await.exec().await.unwrap();

        let rows: Vec<Expr> = (0..10)
            .map(|i| obj! { "id" => i, "num" => 20 - i })
            .collect();
        table(TABLE).insert(rows).run(session).await.exec().await.unwrap();
    }

    #[tokio::test]
    async fn test_s1_add() {
        let session = session().await;
        let value: i64 = expr(1).add(2).run(&session).await.one().await.unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_s2_distinct() {
        let session = session().await;
        let values: Vec<i64> = expr(vec![1, 1, 2, 3, 3])
            .distinct()
            .run(&session)
            .await
            .all()
            .await
            .unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_s3_filter_count() {
        let session = session().await;
        seed(&session).await;

        let count: i64 = table(TABLE)
            .filter(obj! { "num" => 16 })
            .count()
            .run(&session)
            .await
            .one()
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_s4_order_by() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Row {
            id: i64,
            num: i64,
        }

        let session = session().await;
        seed(&session).await;

        let marked: Vec<Row> = table(TABLE)
            .order_by([asc("num")])
            .run(&session)
            .await
            .all()
            .await
            .unwrap();
        let plain: Vec<Row> = table(TABLE)
            .order_by(["num"])
            .run(&session)
            .await
            .all()
            .await
            .unwrap();

        assert_eq!(marked.len(), 10);
        assert!(marked.windows(2).all(|w| w[0].num <= w[1].num));
        assert_eq!(marked, plain);
    }

    #[tokio::test]
    async fn test_s5_merge() {
        let session = session().await;
        let value: serde_json::Value = expr(obj! { "a" => 1 })
            .merge(obj! { "b" => 2 })
            .run(&session)
            .await
            .one()
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"a": 1, "b": 2}));
    }

    /// A filter yields a sequence, and `one` only accepts an atom, so the
    /// missing row is looked up by primary key instead.
    #[tokio::test]
    async fn test_s6_missing_row_by_key_instead_of_filter() {
        let session = session().await;
        seed(&session).await;

        let filtered = table(TABLE)
            .filter(obj! { "num" => 999 })
            .run(&session)
            .await
            .one::<Datum>()
            .await;
        assert!(matches!(filtered, Err(Error::WrongResponseType { .. })));

        let result = table(TABLE).get(999).run(&session).await.one::<Datum>().await;
        assert!(matches!(result, Err(Error::NoSuchRow)));
    }
}
