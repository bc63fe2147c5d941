mod support;

use std::time::Duration;

use tokio::time::{timeout, Instant};

use reddish::{create_pool, Commands, Config, Error, Frame, PoolEvent};
use support::{mock_server, plan_server, ConnPlan};

fn config(port: u16) -> Config {
    let mut config = Config::new("127.0.0.1", port);
    config.auto_reconnect_after = None;
    config
}

#[tokio::test]
async fn pool_serves_commands() {
    let port = plan_server(vec![
        ConnPlan::reply(b"+PONG\r\n"),
        ConnPlan::reply(b"+PONG\r\n"),
    ])
    .await;
    let mut pool = create_pool(config(port), 2).await.unwrap();

    let reply = pool.ping().await.unwrap();
    assert_eq!(reply, Frame::Simple("PONG".to_string()));
}

#[tokio::test]
async fn third_submit_waits_for_a_free_connection() {
    let delay = Duration::from_millis(100);
    let port = plan_server(vec![
        ConnPlan::reply_after(b"+OK\r\n", delay),
        ConnPlan::reply_after(b"+OK\r\n", delay),
    ])
    .await;
    let pool = create_pool(config(port), 2).await.unwrap();

    let started = Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..3 {
        let mut pool = pool.clone();
        tasks.push(tokio::spawn(
            async move { pool.set("k", "v").await },
        ));
    }
    for task in tasks {
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply, Frame::Simple("OK".to_string()));
    }

    // Two connections for three commands: the third had to wait for one of
    // the first two to finish.
    assert!(started.elapsed() >= Duration::from_millis(180));
}

#[tokio::test]
async fn multi_reserves_its_connection() {
    let port = plan_server(vec![ConnPlan::ok()]).await;
    let pool = create_pool(config(port), 1).await.unwrap();

    let tx = pool.multi().await.unwrap();

    // The only connection is reserved until the transaction closes.
    let err = pool.multi().await.unwrap_err();
    assert!(matches!(err, Error::Usage(_)));

    drop(tx);

    // The abandoned transaction is discarded before the next command runs.
    let mut pool = pool;
    let reply = pool.ping().await.unwrap();
    assert_eq!(reply, Frame::Simple("OK".to_string()));
}

#[tokio::test]
async fn pmulti_runs_on_a_single_connection() {
    let server = mock_server().await;
    let pool = create_pool(config(server.port), 1).await.unwrap();

    server.reply(b"+OK\r\n+QUEUED\r\n+QUEUED\r\n+QUEUED\r\n*3\r\n+OK\r\n:2\r\n$1\r\n2\r\n");
    let reply = pool
        .pmulti()
        .set("x", "1")
        .incr("x")
        .get("x")
        .send()
        .await
        .unwrap();

    assert_eq!(
        reply,
        Frame::Array(Some(vec![
            Frame::Simple("OK".to_string()),
            Frame::Integer(2),
            Frame::Bulk(Some("2".to_string())),
        ]))
    );
}

#[tokio::test]
async fn disconnect_fails_later_submits() {
    let port = plan_server(vec![ConnPlan::ok(), ConnPlan::ok()]).await;
    let pool = create_pool(config(port), 2).await.unwrap();

    pool.disconnect().await;

    let mut pool = pool;
    let err = pool.ping().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn member_lifecycle_shows_up_as_pool_events() {
    let port = plan_server(vec![ConnPlan::ok(), ConnPlan::ok()]).await;
    let pool = create_pool(config(port), 2).await.unwrap();
    let mut events = pool.subscribe();

    pool.disconnect().await;

    let mut disconnected = 0;
    while disconnected < 2 {
        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timed out waiting for pool events")
            .unwrap();
        if let PoolEvent::ClientDisconnected(_, had_error) = event {
            assert!(!had_error);
            disconnected += 1;
        }
    }
}
