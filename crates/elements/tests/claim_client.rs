//! Exercises the claim client against a minimal JSON-RPC responder.

use std::{io::Write, str::FromStr, time::Duration};

use bitcoin::Txid;
use pegin_elements::{ElementsClaimClient, RpcEndpoint};
use pegin_service::{ClaimBackend, ClaimError};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

const TXID: &str = "4cfbec13cf1510545f285cceceb6229bd7b6a918a8f6eba1dbee64d26226a3b7";

/// What the responder does with one request.
enum Reply {
    Result(Value),
    Error(i64, &'static str),
    Hang,
}

/// Answers one request per entry of `replies`, returning the request bodies it saw.
async fn serve(replies: Vec<Reply>) -> (String, JoinHandle<Vec<Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for reply in replies {
            let (mut sock, _) = listener.accept().await.unwrap();
            let (head, body) = read_request(&mut sock).await;
            assert!(head.contains("Basic dXNlcjpwYXNz"), "{head}");
            let req: Value = serde_json::from_str(&body).unwrap();
            let id = req["id"].clone();
            seen.push(req);

            let resp = match reply {
                Reply::Result(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                Reply::Error(code, message) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": code, "message": message}
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };
            let resp = resp.to_string();
            let mut out = Vec::new();
            write!(
                out,
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{resp}",
                resp.len()
            )
            .unwrap();
            sock.write_all(&out).await.unwrap();
            sock.shutdown().await.unwrap();
        }
        seen
    });
    (url, handle)
}

async fn read_request(sock: &mut TcpStream) -> (String, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let head = &text[..head_end];
            let len = head
                .lines()
                .find_map(|l| {
                    let l = l.to_ascii_lowercase();
                    l.strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            let body = &text[head_end + 4..];
            if body.len() >= len {
                return (head.to_owned(), body.to_owned());
            }
        }
        assert!(n > 0, "connection closed mid-request");
    }
}

fn endpoint(url: &str) -> RpcEndpoint {
    RpcEndpoint::new(url, "user", "pass").with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_pegin_address() {
    let (url, server) = serve(vec![Reply::Result(json!({
        "mainchain_address": "bcrt1qpegin",
        "claim_script": "0014abcd"
    }))])
    .await;
    let client = ElementsClaimClient::new(&endpoint(&url), Duration::from_secs(5), &endpoint(&url))
        .unwrap();

    let addr = client.get_pegin_address().await.unwrap();
    assert_eq!(addr.mainchain_address, "bcrt1qpegin");
    assert_eq!(addr.claim_script, "0014abcd");

    let seen = server.await.unwrap();
    assert_eq!(seen[0]["method"], "getpeginaddress");
}

#[tokio::test]
async fn test_proof_is_requested_for_txid_list() {
    let (url, server) = serve(vec![Reply::Result(json!("00ff"))]).await;
    let client = ElementsClaimClient::new(&endpoint(&url), Duration::from_secs(5), &endpoint(&url))
        .unwrap();

    let proof = client
        .get_tx_out_proof(Txid::from_str(TXID).unwrap())
        .await
        .unwrap();
    assert_eq!(proof, "00ff");

    let seen = server.await.unwrap();
    assert_eq!(seen[0]["method"], "gettxoutproof");
    assert_eq!(seen[0]["params"], json!([[TXID]]));
}

#[tokio::test]
async fn test_claim_rpc_error_is_not_ambiguous() {
    let (url, _server) = serve(vec![Reply::Error(-8, "Invalid claim_script")]).await;
    let client = ElementsClaimClient::new(&endpoint(&url), Duration::from_secs(5), &endpoint(&url))
        .unwrap();

    let err = client.claim_pegin("0200", "00ff", "0014").await.unwrap_err();
    assert_eq!(
        err,
        ClaimError::Rpc {
            code: -8,
            message: "Invalid claim_script".into()
        }
    );
    assert!(!err.is_ambiguous());
}

#[tokio::test]
async fn test_claim_timeout_is_ambiguous() {
    let (url, _server) = serve(vec![Reply::Hang]).await;
    let client = ElementsClaimClient::new(
        &endpoint(&url),
        Duration::from_millis(200),
        &endpoint(&url),
    )
    .unwrap();

    let err = client.claim_pegin("0200", "00ff", "0014").await.unwrap_err();
    assert_eq!(err, ClaimError::Timeout);
    assert!(err.is_ambiguous());
}
