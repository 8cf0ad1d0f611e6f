mod common;

use common::{Peer, Request, TestServer};
use http::{Method, StatusCode};
use servicenet::base::neterror::NetError;
use servicenet::http::parser::Framing;
use servicenet::http::RequestBody;
use servicenet::urlrequest::{EngineConfig, RequestOptions, URLRequest, URLRequestContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Serves one canned raw response per request, forever.
async fn raw_server(response: &'static [u8]) -> TestServer {
    TestServer::start(move |mut peer: Peer, _| async move {
        while peer.read_request().await.is_some() {
            peer.write(response).await;
        }
    })
    .await
}

#[tokio::test]
async fn test_chunked_response_is_decoded() {
    let server = raw_server(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n",
    )
    .await;
    let ctx = URLRequestContext::new();

    for _ in 0..2 {
        let response = URLRequest::new(&ctx, &server.url("/")).unwrap().send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "hello world");
    }
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_chunked_response_streams_pieces() {
    let server = TestServer::start(|mut peer: Peer, _| async move {
        if peer.read_request().await.is_some() {
            peer.write(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nfirs\r\n").await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            peer.write(b"6\r\nt, las\r\n1\r\nt\r\n0\r\n\r\n").await;
        }
    })
    .await;
    let ctx = URLRequestContext::new();

    let mut response = URLRequest::new(&ctx, &server.url("/")).unwrap().send().await.unwrap();
    let mut body = response.take_body().unwrap();
    assert_eq!(body.framing(), Framing::Chunked);

    let mut collected = Vec::new();
    while let Some(chunk) = body.chunk().await.unwrap() {
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, b"first, last");
    assert!(body.is_complete());
}

#[tokio::test]
async fn test_malformed_chunk_size_fails() {
    let server =
        raw_server(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nhello\r\n0\r\n\r\n")
            .await;
    let ctx = URLRequestContext::new();

    let response = URLRequest::new(&ctx, &server.url("/")).unwrap().send().await.unwrap();
    assert_eq!(response.bytes().await.unwrap_err(), NetError::InvalidChunkedEncoding);
    assert_eq!(ctx.socket_pool().live_count(), 0);
}

#[tokio::test]
async fn test_body_until_close() {
    let server = TestServer::start(|mut peer: Peer, _| async move {
        if peer.read_request().await.is_some() {
            peer.write(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nall of it").await;
        }
    })
    .await;
    let ctx = URLRequestContext::new();

    let response = URLRequest::new(&ctx, &server.url("/")).unwrap().send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "all of it");
    assert_eq!(ctx.socket_pool().live_count(), 0);
}

#[tokio::test]
async fn test_truncated_fixed_length_body() {
    let server = TestServer::start(|mut peer: Peer, _| async move {
        if peer.read_request().await.is_some() {
            peer.write(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nfour").await;
        }
    })
    .await;
    let ctx = URLRequestContext::new();

    let response = URLRequest::new(&ctx, &server.url("/")).unwrap().send().await.unwrap();
    assert_eq!(response.bytes().await.unwrap_err(), NetError::ContentLengthMismatch);
}

#[tokio::test]
async fn test_head_response_has_no_body() {
    let server = raw_server(b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n").await;
    let ctx = URLRequestContext::new();

    let response = URLRequest::new(&ctx, &server.url("/"))
        .unwrap()
        .method(Method::HEAD)
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers().get("content-length").unwrap(), "1234");
    assert!(response.bytes().await.unwrap().is_empty());
    assert_eq!(ctx.socket_pool().idle_count(), 1);
}

#[tokio::test]
async fn test_no_content_keeps_connection() {
    let server = raw_server(b"HTTP/1.1 204 No Content\r\n\r\n").await;
    let ctx = URLRequestContext::new();

    let response = URLRequest::new(&ctx, &server.url("/")).unwrap().send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    drop(response);
    assert_eq!(ctx.socket_pool().idle_count(), 1);
}

#[tokio::test]
async fn test_dropping_unread_body_discards_connection() {
    let server = raw_server(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
    let ctx = URLRequestContext::new();

    let response = URLRequest::new(&ctx, &server.url("/")).unwrap().send().await.unwrap();
    drop(response);
    assert_eq!(ctx.socket_pool().live_count(), 0);
}

/// Records every request and answers with the received body.
async fn echo_server(log: Arc<Mutex<Vec<Request>>>) -> TestServer {
    TestServer::start(move |mut peer: Peer, _| {
        let log = log.clone();
        async move {
            while let Some(request) = peer.read_request().await {
                let body = String::from_utf8_lossy(&request.body).to_string();
                log.lock().unwrap().push(request);
                peer.respond("200 OK", &[], &body).await;
            }
        }
    })
    .await
}

#[tokio::test]
async fn test_stream_body_without_length_is_chunked() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = echo_server(log.clone()).await;
    let ctx = URLRequestContext::new();

    let source = std::io::Cursor::new(vec![b'x'; 40_000]);
    let response = URLRequest::new(&ctx, &server.url("/upload"))
        .unwrap()
        .method(Method::POST)
        .body(RequestBody::stream(source, None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap().len(), 40_000);

    let log = log.lock().unwrap();
    assert_eq!(log[0].header("transfer-encoding"), Some("chunked"));
    assert!(log[0].header("content-length").is_none());
    assert_eq!(log[0].header("expect"), Some("100-continue"));
}

#[tokio::test]
async fn test_empty_post_sends_zero_length() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = echo_server(log.clone()).await;
    let ctx = URLRequestContext::new();

    URLRequest::new(&ctx, &server.url("/"))
        .unwrap()
        .method(Method::POST)
        .send()
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0].header("content-length"), Some("0"));
    assert!(log[0].header("expect").is_none());
}

#[tokio::test]
async fn test_continue_callback_is_invoked() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = echo_server(log).await;
    let ctx = URLRequestContext::new();
    let continues = Arc::new(AtomicUsize::new(0));
    let counter = continues.clone();

    let response = URLRequest::new(&ctx, &server.url("/"))
        .unwrap()
        .method(Method::PUT)
        .body("document")
        .on_continue(move |status, _| {
            assert_eq!(status, StatusCode::CONTINUE);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "document");
    assert_eq!(continues.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_body_sent_when_continue_never_comes() {
    let server = TestServer::start(|mut peer: Peer, _| async move {
        peer.send_continue = false;
        while let Some(request) = peer.read_request().await {
            let body = String::from_utf8_lossy(&request.body).to_string();
            peer.respond("200 OK", &[], &body).await;
        }
    })
    .await;
    let ctx = URLRequestContext::builder()
        .config(EngineConfig::default().with_continue_timeout(Duration::from_millis(100)))
        .build();

    let started = Instant::now();
    let response = URLRequest::new(&ctx, &server.url("/"))
        .unwrap()
        .method(Method::POST)
        .body("late")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "late");
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_final_response_before_body() {
    let server = TestServer::start(|mut peer: Peer, _| async move {
        if peer.read_head().await.is_some() {
            peer.respond("200 OK", &[], "skipped").await;
        }
    })
    .await;
    let ctx = URLRequestContext::new();

    let response = URLRequest::new(&ctx, &server.url("/"))
        .unwrap()
        .method(Method::POST)
        .body("never sent")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "skipped");
    // The server never read the body, so the connection cannot be reused.
    assert_eq!(ctx.socket_pool().live_count(), 0);
}

#[tokio::test]
async fn test_expect_continue_can_be_disabled() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = echo_server(log.clone()).await;
    let ctx = URLRequestContext::new();

    let options = RequestOptions {
        expect_continue: Some(false),
        ..Default::default()
    };
    URLRequest::new(&ctx, &server.url("/"))
        .unwrap()
        .method(Method::POST)
        .body("plain")
        .options(options)
        .send()
        .await
        .unwrap();
    assert!(log.lock().unwrap()[0].header("expect").is_none());
}

#[tokio::test]
async fn test_request_header_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = echo_server(log.clone()).await;
    let ctx = URLRequestContext::builder()
        .config(EngineConfig::default().with_user_agent(Some("servicenet-test/1".to_string())))
        .build();

    URLRequest::new(&ctx, &server.url("/"))
        .unwrap()
        .header("X-First", "1")
        .unwrap()
        .header("X-Second", "2")
        .unwrap()
        .send()
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        log[0].header_names(),
        vec!["host", "connection", "x-first", "x-second", "user-agent"]
    );
    assert_eq!(log[0].header("user-agent"), Some("servicenet-test/1"));
}

#[cfg(feature = "json")]
#[tokio::test]
async fn test_json_body() {
    #[derive(serde::Deserialize)]
    struct Health {
        status: String,
        checks: u32,
    }

    let server = raw_server(
        b"HTTP/1.1 200 OK\r\nContent-Length: 31\r\n\r\n{\"status\":\"green\",\"checks\":12}\n",
    )
    .await;
    let ctx = URLRequestContext::new();

    let health: Health = URLRequest::new(&ctx, &server.url("/health"))
        .unwrap()
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.status, "green");
    assert_eq!(health.checks, 12);
}
