mod common;

use std::time::Duration;

use pd_client::{PdClient, PdClientConfig};

use common::{spawn_mock_pd, MockPd};

async fn client_with_mock(mock: &MockPd) -> PdClient {
    let url = spawn_mock_pd(mock.clone()).await;
    mock.set_leader_url(url.clone());
    PdClient::new(vec![url], PdClientConfig::default())
        .await
        .expect("bootstrap against mock pd should succeed")
}

/// S1: a single batch of three requests receives logical values counting
/// down from the server's reported high-water mark.
#[tokio::test]
async fn scenario_s1_single_batch_of_three() {
    let mock = MockPd::new("");
    let client = client_with_mock(&mock).await;

    let a = client.get_ts_async().await.unwrap();
    let b = client.get_ts_async().await.unwrap();
    let c = client.get_ts_async().await.unwrap();
    mock.push_tso_response(3, 100, 50);

    let (pa, la) = a.wait().await.unwrap();
    let (pb, lb) = b.wait().await.unwrap();
    let (pc, lc) = c.wait().await.unwrap();

    assert_eq!((pa, la), (100, 48));
    assert_eq!((pb, lb), (100, 49));
    assert_eq!((pc, lc), (100, 50));

    client.close().await;
}

/// S2: a batch of five receives five contiguous logical values.
#[tokio::test]
async fn scenario_s2_batch_of_five() {
    let mock = MockPd::new("");
    let client = client_with_mock(&mock).await;

    let mut futures = Vec::new();
    for _ in 0..5 {
        futures.push(client.get_ts_async().await.unwrap());
    }
    mock.push_tso_response(5, 200, 104);

    let mut logicals = Vec::new();
    for fut in futures {
        let (physical, logical) = fut.wait().await.unwrap();
        assert_eq!(physical, 200);
        logicals.push(logical);
    }
    assert_eq!(logicals, vec![100, 101, 102, 103, 104]);

    client.close().await;
}

/// S3: a count mismatch fails every request in the batch with a
/// length-mismatch error.
#[tokio::test]
async fn scenario_s3_length_mismatch_fails_whole_batch() {
    let mock = MockPd::new("");
    let client = client_with_mock(&mock).await;

    let a = client.get_ts_async().await.unwrap();
    let b = client.get_ts_async().await.unwrap();
    let c = client.get_ts_async().await.unwrap();
    // Server claims only 2 were processed though 3 were sent.
    mock.push_tso_response(2, 100, 50);

    let ra = a.wait().await;
    let rb = b.wait().await;
    let rc = c.wait().await;

    assert!(matches!(ra, Err(pd_client::Error::BatchLengthMismatch { .. })));
    assert!(matches!(rb, Err(pd_client::Error::BatchLengthMismatch { .. })));
    assert!(matches!(rc, Err(pd_client::Error::BatchLengthMismatch { .. })));

    client.close().await;
}

/// Property: timestamps issued to the same caller across sequential calls
/// strictly increase.
#[tokio::test]
async fn monotonic_across_sequential_batches() {
    let mock = MockPd::new("");
    let client = client_with_mock(&mock).await;

    let first = client.get_ts_async().await.unwrap();
    mock.push_tso_response(1, 100, 10);
    let (p1, l1) = first.wait().await.unwrap();

    let second = client.get_ts_async().await.unwrap();
    mock.push_tso_response(1, 100, 11);
    let (p2, l2) = second.wait().await.unwrap();

    assert!((p1, l1) < (p2, l2));

    client.close().await;
}

/// Property: after `close()` returns, a future submitted but never observed
/// before shutdown surfaces a closing error, and the client can be dropped
/// cleanly.
#[tokio::test]
async fn shutdown_drains_pending_requests() {
    let mock = MockPd::new("");
    let client = client_with_mock(&mock).await;

    let pending = client.get_ts_async().await.unwrap();
    // No scripted response is ever provided: the request remains queued
    // until shutdown revokes it.
    client.close().await;

    let result = tokio::time::timeout(Duration::from_secs(5), pending.wait())
        .await
        .expect("revocation should not hang");
    assert!(matches!(result, Err(pd_client::Error::Closing)));
}
