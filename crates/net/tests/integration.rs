//! Integration tests for the download layer

use apkforge_errors::{ArchiveError, Error, NetworkError};
use apkforge_events::{channel, AppEvent, DownloadEvent};
use apkforge_net::{DownloadConfig, Downloader, NetClient};
use httpmock::prelude::*;
use std::io::Write;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn zip_body() -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("AndroidManifest.xml", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"manifest").unwrap();
    writer.finish().unwrap().into_inner()
}

fn quick_config() -> DownloadConfig {
    DownloadConfig {
        max_attempts: 3,
        retry_delay: Duration::from_millis(10),
        ..DownloadConfig::default()
    }
}

fn downloader(config: DownloadConfig) -> Downloader {
    Downloader::new(NetClient::with_defaults().unwrap(), config)
}

/// Serves one HTTP response per connection: 500 for the first
/// `failures` connections, then 200 with `body`.
async fn flaky_server(failures: usize, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let mut reader = BufReader::new(stream);
            // Drain the request head.
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
            }
            let mut stream = reader.into_inner();
            if served < failures {
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            } else {
                let head = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&body).await;
            }
            let _ = stream.flush().await;
            served += 1;
        }
    });
    format!("http://{addr}/app.apk")
}

#[tokio::test]
async fn fetch_streams_and_validates() {
    let server = MockServer::start();
    let body = zip_body();
    server.mock(|when, then| {
        when.method(GET).path("/app.apk");
        then.status(200)
            .header("content-length", body.len().to_string())
            .body(&body);
    });

    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.apk");
    let (tx, mut rx) = channel();

    let result = downloader(quick_config())
        .fetch(&server.url("/app.apk"), &dest, &tx)
        .await
        .unwrap();

    assert_eq!(result.attempts, 1);
    assert_eq!(result.size, body.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert_eq!(
        result.hash,
        blake3::hash(&body).to_hex().to_string(),
        "hash covers the streamed bytes"
    );

    let mut saw_started = false;
    let mut saw_completed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            AppEvent::Download(DownloadEvent::Started { .. }) => saw_started = true,
            AppEvent::Download(DownloadEvent::Completed { .. }) => saw_completed = true,
            _ => {}
        }
    }
    assert!(saw_started && saw_completed);
}

#[tokio::test]
async fn fetch_succeeds_on_third_of_three_attempts() {
    let url = flaky_server(2, zip_body()).await;
    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.apk");
    let (tx, mut rx) = channel();

    let result = downloader(quick_config()).fetch(&url, &dest, &tx).await.unwrap();
    assert_eq!(result.attempts, 3);
    assert!(dest.exists(), "validated file is kept");

    let retries = {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AppEvent::Download(DownloadEvent::Retrying { .. })) {
                count += 1;
            }
        }
        count
    };
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn fetch_returns_last_failure_when_exhausted() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/app.apk");
        then.status(503);
    });

    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.apk");
    let (tx, mut rx) = channel();

    let err = downloader(DownloadConfig {
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
        ..DownloadConfig::default()
    })
    .fetch(&server.url("/app.apk"), &dest, &tx)
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Network(NetworkError::HttpError { status: 503, .. })
    ));
    assert!(!dest.exists(), "partial file deleted on terminal failure");

    let mut saw_failed = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, AppEvent::Download(DownloadEvent::Failed { .. })) {
            saw_failed = true;
        }
    }
    assert!(saw_failed);
}

#[tokio::test]
async fn corrupt_body_is_retried_then_rejected() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/app.apk");
        then.status(200).body("definitely not a zip archive");
    });

    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.apk");
    let (tx, _rx) = channel();

    let err = downloader(DownloadConfig {
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
        ..DownloadConfig::default()
    })
    .fetch(&server.url("/app.apk"), &dest, &tx)
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Archive(ArchiveError::Invalid { .. })
    ));
    // Corrupt downloads trigger a re-download, so both attempts hit the
    // server and nothing is left on disk.
    mock.assert_hits(2);
    assert!(!dest.exists());
}

#[tokio::test]
async fn unsupported_protocol_fails_without_attempts() {
    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.apk");
    let (tx, _rx) = channel();

    let err = downloader(quick_config())
        .fetch("ftp://mirror.example/app.apk", &dest, &tx)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Network(NetworkError::UnsupportedProtocol { .. })
    ));
    assert!(!dest.exists());
}
