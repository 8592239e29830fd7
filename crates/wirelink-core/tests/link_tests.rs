//! End-to-end tests: two links talking over an in-memory duplex channel.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use wirelink::{
    Arg, DisconnectReason, Handler, HandlerBuilder, Interface, Link, LinkError, LinkOptions,
    LinkState, Reply,
};

const WAIT: Duration = Duration::from_secs(5);

fn server_interface() -> Interface {
    Interface::new("Server")
        .value("foo", 0)
        .value("add", 2)
        .value("fail", 1)
        .value("hang", 0)
        .value("compute", 0)
        .value("handoff", 0)
        .value("v2", 0)
        .value("missing", 0)
        .bytes("reverse", 1)
        .void("log", 1)
        .void("abort", 0)
}

fn client_interface() -> Interface {
    Interface::new("Client").value("hint", 0)
}

fn server_handler(link: &Link) -> HandlerBuilder {
    let callback = link.downgrade();
    let aborting = link.downgrade();
    Handler::builder()
        .method("foo", 0, |_| async { Ok(Reply::json(&-42)?) })
        .method("add", 2, |call| async move {
            let a: i64 = call.arg(0)?;
            let b: i64 = call.arg(1)?;
            Ok(Reply::json(&(a + b))?)
        })
        .method("fail", 1, |call| async move {
            let message: String = call.arg(0)?;
            anyhow::bail!("{}", message)
        })
        .method("hang", 0, |_| async {
            std::future::pending::<()>().await;
            Ok(Reply::json(&())?)
        })
        .method("compute", 0, move |_| {
            let link = callback.upgrade();
            async move {
                let link = link.ok_or_else(|| anyhow::anyhow!("link dropped"))?;
                let hint: i32 = link.remote()?.call("hint", vec![]).await?;
                Ok(Reply::json(&(hint + 1))?)
            }
        })
        .method("reverse", 1, |call| async move {
            let mut data = call.bytes(0)?.to_vec();
            data.reverse();
            Ok(Reply::bytes(data))
        })
        .void_method("abort", 0, move |_| {
            let link = aborting.upgrade();
            async move {
                if let Some(link) = link {
                    link.close().await;
                }
                Ok(())
            }
        })
}

fn client_handler() -> HandlerBuilder {
    Handler::builder().method("hint", 0, |_| async { Ok(Reply::json(&41)?) })
}

fn teardown_signal() -> (
    impl FnOnce(DisconnectReason) + Send + 'static,
    oneshot::Receiver<DisconnectReason>,
) {
    let (tx, rx) = oneshot::channel();
    (
        move |reason| {
            let _ = tx.send(reason);
        },
        rx,
    )
}

/// Open a server link and a client link on either end of one duplex channel.
fn connect_with(
    server: impl FnOnce(&Link) -> HandlerBuilder,
    client: HandlerBuilder,
) -> (Link, Link) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let server_link = Link::builder(client_interface()).name("server").stream(a);
    let client_link = Link::builder(server_interface()).name("client").stream(b);

    server_link.open(server(&server_link).build()).unwrap();
    client_link.open(client.build()).unwrap();
    (server_link, client_link)
}

fn connect() -> (Link, Link) {
    connect_with(server_handler, client_handler())
}

#[tokio::test]
async fn test_value_call_round_trip() {
    let (server, client) = connect();
    let remote = client.remote().unwrap();

    let answer: i32 = remote.call("foo", vec![]).await.unwrap();
    assert_eq!(answer, -42);

    let sum: i64 = remote
        .call(
            "add",
            vec![Arg::value(&40).unwrap(), Arg::value(&2).unwrap()],
        )
        .await
        .unwrap();
    assert_eq!(sum, 42);
    assert_eq!(client.pending_calls(), 0);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_remote_exception_carries_description() {
    let (_server, client) = connect();
    let remote = client.remote().unwrap();

    let err = remote
        .call::<i32>("fail", vec![Arg::value("disk on fire").unwrap()])
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Remote { .. }));
    assert_eq!(err.remote_message(), Some("disk on fire"));
    assert!(client.is_open());
}

#[tokio::test]
async fn test_wrong_argument_type_is_remote_failure() {
    let (_server, client) = connect();
    let remote = client.remote().unwrap();

    let err = remote
        .call::<i64>(
            "add",
            vec![Arg::value("forty").unwrap(), Arg::value(&2).unwrap()],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Remote { .. }));
    assert!(client.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_local_method_times_out() {
    let (_server, client) = connect();
    let remote = client.remote().unwrap();

    let err = remote
        .call_with_timeout::<i32>("missing", vec![], Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(client.pending_calls(), 0);
    assert!(client.is_open());

    // The link keeps working after a timeout.
    let answer: i32 = remote.call("foo", vec![]).await.unwrap();
    assert_eq!(answer, -42);
}

#[tokio::test(start_paused = true)]
async fn test_default_call_timeout_applies() {
    let (a, b) = tokio::io::duplex(4096);
    let server = Link::builder(client_interface()).stream(a);
    let client = Link::builder(server_interface())
        .options(LinkOptions::default().with_call_timeout(Duration::from_millis(250)))
        .stream(b);
    server.open(Handler::empty()).unwrap();
    client.open(Handler::empty()).unwrap();

    let err = client
        .remote()
        .unwrap()
        .call::<i32>("foo", vec![])
        .await
        .unwrap_err();
    match err {
        LinkError::Timeout { method, after } => {
            assert_eq!(method, "foo");
            assert_eq!(after, Duration::from_millis(250));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_void_call_is_delivered_without_response() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_server, client) = connect_with(
        move |link| {
            let tx = tx.clone();
            server_handler(link).void_method("log", 1, move |call| {
                let tx = tx.clone();
                async move {
                    let message: String = call.arg(0)?;
                    let _ = tx.send(message);
                    Ok(())
                }
            })
        },
        client_handler(),
    );

    let remote = client.remote().unwrap();
    remote
        .notify("log", vec![Arg::value("first").unwrap()])
        .await
        .unwrap();
    remote
        .notify("log", vec![Arg::value("second").unwrap()])
        .await
        .unwrap();
    assert_eq!(client.pending_calls(), 0);

    let first = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
    let second = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
    let mut seen = vec![first.unwrap(), second.unwrap()];
    seen.sort();
    assert_eq!(seen, vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test]
async fn test_abort_closes_both_sides() {
    let (server_teardown, server_rx) = teardown_signal();
    let (client_teardown, client_rx) = teardown_signal();
    let (server, client) = connect_with(
        move |link| server_handler(link).on_disconnect(server_teardown),
        client_handler().on_disconnect(client_teardown),
    );

    client.remote().unwrap().notify("abort", vec![]).await.unwrap();

    let server_reason = tokio::time::timeout(WAIT, server_rx).await.unwrap().unwrap();
    let client_reason = tokio::time::timeout(WAIT, client_rx).await.unwrap().unwrap();
    assert_eq!(server_reason, DisconnectReason::Local);
    assert_eq!(client_reason, DisconnectReason::RemoteClosed);
    assert!(!server.is_open());
    assert!(!client.is_open());
    assert_eq!(client.state(), LinkState::Closed);

    let err = client.remote().unwrap_err();
    assert!(err.is_disconnect());
}

#[tokio::test]
async fn test_close_releases_blocked_callers() {
    let (server, client) = connect();
    let remote = client.remote().unwrap();

    let call = tokio::spawn(async move { remote.call::<()>("hang", vec![]).await });
    while client.pending_calls() == 0 {
        tokio::task::yield_now().await;
    }

    server.close().await;
    let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(LinkError::Closed { .. })));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_local_close_releases_own_callers() {
    let (_server, client) = connect();
    let remote = client.remote().unwrap();

    let call = tokio::spawn(async move { remote.call::<()>("hang", vec![]).await });
    while client.pending_calls() == 0 {
        tokio::task::yield_now().await;
    }

    client.close().await;
    let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(LinkError::Closed { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_get_their_own_replies() {
    const CALLERS: i64 = 32;
    const BLOB_LEN: usize = 100_000;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_server, client) = connect_with(
        move |link| {
            let tx = tx.clone();
            server_handler(link).void_method("log", 1, move |call| {
                let tx = tx.clone();
                async move {
                    let data = call.bytes(0)?;
                    let _ = tx.send(data);
                    Ok(())
                }
            })
        },
        client_handler(),
    );
    let remote = client.remote().unwrap();

    let mut calls = Vec::new();
    for i in 0..CALLERS {
        let remote = remote.clone();
        calls.push(tokio::spawn(async move {
            let sum: i64 = remote
                .call("add", vec![Arg::value(&i).unwrap(), Arg::value(&i).unwrap()])
                .await
                .unwrap();
            (i, sum)
        }));
    }
    let mut notes = Vec::new();
    for i in 0..8u8 {
        let remote = remote.clone();
        notes.push(tokio::spawn(async move {
            remote
                .notify("log", vec![Arg::bytes(vec![i; BLOB_LEN])])
                .await
                .unwrap();
        }));
    }

    for call in calls {
        let (i, sum) = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
        assert_eq!(sum, 2 * i);
    }
    for note in notes {
        tokio::time::timeout(WAIT, note).await.unwrap().unwrap();
    }

    let mut fills = Vec::new();
    for _ in 0..8 {
        let data = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(data.len(), BLOB_LEN);
        assert!(data.iter().all(|b| *b == data[0]));
        fills.push(data[0]);
    }
    fills.sort();
    assert_eq!(fills, (0..8u8).collect::<Vec<_>>());
    assert_eq!(client.pending_calls(), 0);
    assert!(client.is_open());
}

#[tokio::test]
async fn test_handler_can_call_back_into_peer() {
    let (_server, client) = connect();
    let answer: i32 = client
        .remote()
        .unwrap()
        .call("compute", vec![])
        .await
        .unwrap();
    assert_eq!(answer, 42);
}

#[tokio::test]
async fn test_bytes_pass_through_undecoded() {
    let (_server, client) = connect();
    let data = Bytes::from_static(&[0, 1, 2, 0xff, b'{']);

    let reversed = client
        .remote()
        .unwrap()
        .call_bytes("reverse", vec![Arg::bytes(data)])
        .await
        .unwrap();
    assert_eq!(&reversed[..], &[b'{', 0xff, 2, 1, 0]);
}

#[tokio::test]
async fn test_remote_refuses_undeclared_and_mismatched_calls() {
    let (_server, client) = connect();
    let remote = client.remote().unwrap();

    let err = remote.call::<i32>("nope", vec![]).await.unwrap_err();
    assert!(matches!(err, LinkError::UnknownMethod { .. }));

    let err = remote.call::<i32>("foo", vec![Arg::value(&1).unwrap()]).await.unwrap_err();
    assert!(matches!(err, LinkError::UnknownMethod { arity: 1, .. }));

    let err = remote.call::<()>("abort", vec![]).await.unwrap_err();
    assert!(matches!(err, LinkError::SignatureMismatch { .. }));

    let err = remote.notify("foo", vec![]).await.unwrap_err();
    assert!(matches!(err, LinkError::SignatureMismatch { .. }));

    let err = remote.call::<i32>("", vec![]).await.unwrap_err();
    assert!(matches!(err, LinkError::InvalidMethodName { .. }));

    assert_eq!(remote.invoke("log", vec![Arg::value("x").unwrap()]).await.unwrap(), None);
    let raw = remote.invoke("foo", vec![]).await.unwrap().unwrap();
    assert_eq!(&raw[..], b"-42");
    assert!(client.is_open());
}

#[tokio::test]
async fn test_transfer_hands_channel_to_successor() {
    let (moved_tx, moved_rx) = oneshot::channel::<Link>();
    let moved_tx = std::sync::Mutex::new(Some(moved_tx));
    let (old_teardown, mut old_rx) = teardown_signal();

    let (server, client) = connect_with(
        move |link| {
            let weak = link.downgrade();
            server_handler(link)
                .method("handoff", 0, move |call| {
                    let link = weak.upgrade();
                    let moved_tx = moved_tx.lock().unwrap().take();
                    async move {
                        let link = link.ok_or_else(|| anyhow::anyhow!("link dropped"))?;
                        let channel = link
                            .transfer(Some((call.call_id(), Reply::json("moved")?)))
                            .await?;
                        let successor = Link::builder(client_interface())
                            .name("successor")
                            .handler(
                                Handler::builder()
                                    .method("v2", 0, |_| async { Ok(Reply::json(&2)?) })
                                    .build(),
                            )
                            .adopt(channel);
                        successor.open(None)?;
                        if let Some(tx) = moved_tx {
                            let _ = tx.send(successor);
                        }
                        // Suppressed: the final reply was already sent by transfer.
                        Ok(Reply::json("late")?)
                    }
                })
                .on_disconnect(old_teardown)
        },
        client_handler(),
    );

    let remote = client.remote().unwrap();
    let reply: String = remote.call("handoff", vec![]).await.unwrap();
    assert_eq!(reply, "moved");

    let successor = tokio::time::timeout(WAIT, moved_rx).await.unwrap().unwrap();
    assert_eq!(server.state(), LinkState::Transferred);
    assert!(server.remote().is_err());

    let version: i32 = remote.call("v2", vec![]).await.unwrap();
    assert_eq!(version, 2);

    // The successor can call the client over the same channel.
    let hint: i32 = successor.remote().unwrap().call("hint", vec![]).await.unwrap();
    assert_eq!(hint, 41);
    assert!(client.is_open());

    successor.close().await;
    // Transfer never runs the old link's teardown.
    assert!(old_rx.try_recv().is_err());
}
