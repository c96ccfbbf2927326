//! End-to-end tests: custody nodes served over HTTP on ephemeral ports

use std::sync::Arc;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use url::Url;

use common::auth::{AuthProvider, LocalWallet, Signer};
use common::crypto::deal;
use common::custody::{
    ConnectionState, CustodyError, CustodyNode, CustodyTransport, ErrorKind, ErrorReply,
    HttpTransport, KeyCustodyClient, ReleaseRequest,
};
use common::oracle::MemoryOracle;
use common::policy::{AccessPolicy, ChainId};
use common::workflow::{EncryptionWorkflow, WorkflowError};
use node::{http_server, NodeState};

const DOMAIN: &str = "custody.test";
const LOCATOR: &str = "ipfs://Qm123";

struct Cluster {
    urls: Vec<Url>,
    shutdowns: Vec<watch::Sender<()>>,
    oracle: MemoryOracle,
}

impl Cluster {
    async fn start(threshold: usize, nodes: usize) -> Self {
        let oracle = MemoryOracle::new();
        let (network_key, shares) = deal(threshold, nodes).unwrap();

        let mut urls = Vec::new();
        let mut shutdowns = Vec::new();
        for share in shares {
            let node = CustodyNode::new(
                share,
                network_key,
                threshold,
                nodes,
                DOMAIN,
                Arc::new(oracle.clone()),
            );
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (shutdown_tx, shutdown_rx) = watch::channel(());
            tokio::spawn(http_server::serve(
                listener,
                NodeState::new(node),
                tracing::Level::DEBUG,
                shutdown_rx,
            ));
            urls.push(Url::parse(&format!("http://{}", addr)).unwrap());
            shutdowns.push(shutdown_tx);
        }

        Self {
            urls,
            shutdowns,
            oracle,
        }
    }

    fn stop(&self, node: usize) {
        self.shutdowns[node].send(()).unwrap();
    }

    fn fund(&self, wallet: &LocalWallet, wei: &str) {
        self.oracle.set_value(
            ChainId::Ethereum,
            "eth_getBalance",
            [wallet.address().to_string(), "latest".to_string()],
            wei,
        );
    }

    fn workflow(&self, wallet: &LocalWallet) -> EncryptionWorkflow<HttpTransport, LocalWallet> {
        let transport = HttpTransport::new(self.urls.clone()).unwrap();
        let auth = AuthProvider::new(wallet.clone(), DOMAIN);
        EncryptionWorkflow::new(KeyCustodyClient::new(transport), auth)
    }
}

fn policy() -> AccessPolicy {
    AccessPolicy::native_balance_at_least(ChainId::Ethereum, "10000000000000").unwrap()
}

#[tokio::test]
async fn test_round_trip_over_http() {
    let cluster = Cluster::start(2, 3).await;
    let alice = LocalWallet::random().unwrap();
    cluster.fund(&alice, "20000000000000");

    let workflow = cluster.workflow(&alice);
    let (ciphertext, blob) = workflow.encrypt(LOCATOR, &policy()).await.unwrap();
    assert_eq!(workflow.custody().state(), ConnectionState::Connected);
    assert_eq!(
        workflow.decrypt(&ciphertext, &blob, &policy()).await.unwrap(),
        LOCATOR
    );
}

#[tokio::test]
async fn test_denial_decoded_from_error_reply() {
    let cluster = Cluster::start(2, 3).await;
    let alice = LocalWallet::random().unwrap();
    let bob = LocalWallet::random().unwrap();
    cluster.fund(&alice, "20000000000000");
    cluster.fund(&bob, "5");

    let (ciphertext, blob) = cluster
        .workflow(&alice)
        .encrypt(LOCATOR, &policy())
        .await
        .unwrap();
    let err = cluster
        .workflow(&bob)
        .decrypt(&ciphertext, &blob, &policy())
        .await
        .unwrap_err();
    assert!(err.is_policy_not_satisfied(), "{:?}", err);
}

#[tokio::test]
async fn test_expired_assertion_over_http() {
    let cluster = Cluster::start(2, 3).await;
    let alice = LocalWallet::random().unwrap();
    cluster.fund(&alice, "20000000000000");
    let workflow = cluster.workflow(&alice);
    let (ciphertext, blob) = workflow.encrypt(LOCATOR, &policy()).await.unwrap();

    let nonces = workflow.custody().challenge().await.unwrap();
    let stale = workflow
        .auth()
        .issue_at(
            ChainId::Ethereum,
            &nonces,
            Utc::now() - chrono::Duration::minutes(20),
        )
        .await
        .unwrap();
    let err = workflow
        .decrypt_with_assertion(&ciphertext, &blob, &policy(), &stale)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Custody(CustodyError::AssertionExpired)
    ));
}

#[tokio::test]
async fn test_replayed_release_over_http() {
    let cluster = Cluster::start(2, 3).await;
    let alice = LocalWallet::random().unwrap();
    cluster.fund(&alice, "20000000000000");
    let workflow = cluster.workflow(&alice);
    let (ciphertext, blob) = workflow.encrypt(LOCATOR, &policy()).await.unwrap();

    let assertion = workflow.issue_assertion(ChainId::Ethereum).await.unwrap();
    workflow
        .decrypt_with_assertion(&ciphertext, &blob, &policy(), &assertion)
        .await
        .unwrap();

    let request = ReleaseRequest {
        policy: policy(),
        blob,
        assertion,
    };
    let transport = HttpTransport::new(cluster.urls.clone()).unwrap();
    let mut refused = 0;
    for node in 0..3 {
        // the first decrypt may have stopped waiting before the third node answered
        if let Err(err) = transport.request_share(node, &request).await {
            assert_eq!(err.kind(), ErrorKind::Assertion, "{:?}", err);
            refused += 1;
        }
    }
    assert!(refused >= 2, "replay collected {} shares", 3 - refused);
}

#[tokio::test]
async fn test_survives_one_stopped_node() {
    let cluster = Cluster::start(2, 3).await;
    let alice = LocalWallet::random().unwrap();
    cluster.fund(&alice, "20000000000000");
    let workflow = cluster.workflow(&alice);
    let (ciphertext, blob) = workflow.encrypt(LOCATOR, &policy()).await.unwrap();

    cluster.stop(0);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let fresh = cluster.workflow(&alice);
    assert_eq!(
        fresh.decrypt(&ciphertext, &blob, &policy()).await.unwrap(),
        LOCATOR
    );

    cluster.stop(1);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let err = cluster
        .workflow(&alice)
        .decrypt(&ciphertext, &blob, &policy())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_status_and_error_bodies() {
    let cluster = Cluster::start(1, 1).await;
    let client = reqwest::Client::new();

    let livez = client
        .get(cluster.urls[0].join("/_status/livez").unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(livez.status(), reqwest::StatusCode::OK);

    let missing = client
        .get(cluster.urls[0].join("/api/v0/nope").unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let reply: ErrorReply = serde_json::from_str(&missing.text().await.unwrap()).unwrap();
    assert_eq!(reply.error.kind(), ErrorKind::Connection);
}
