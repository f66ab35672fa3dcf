use crate::helpers::{eventually, recording_speech};
use chatvoice::control::ControlServer;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn client_session_drives_speech_worker() {
    let (speech, recorder) = recording_speech(false);
    let server = ControlServer::bind("127.0.0.1:0", speech.handle(), false)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run(CancellationToken::new()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut replies = BufReader::new(read).lines();

    write.write_all(b"MSG hello world\n").await.unwrap();
    assert_eq!(
        replies.next_line().await.unwrap().as_deref(),
        Some("Message received")
    );
    assert!(eventually(WAIT, || recorder.spoken() == ["hello world"]).await);

    write.write_all(b"GVC\n").await.unwrap();
    assert_eq!(
        replies.next_line().await.unwrap().as_deref(),
        Some("Voices: {}")
    );

    // Unknown commands are ignored outside strict mode.
    write.write_all(b"XYZ\nCLR\n").await.unwrap();
    assert_eq!(
        replies.next_line().await.unwrap().as_deref(),
        Some("Clearing queue")
    );

    write.write_all(b"EXT\n").await.unwrap();
    assert_eq!(
        replies.next_line().await.unwrap().as_deref(),
        Some("Exiting...")
    );
    assert_eq!(replies.next_line().await.unwrap(), None);

    tokio::time::timeout(WAIT, server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, tokio::task::spawn_blocking(move || speech.join()))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn dropped_client_stops_server_and_worker() {
    let (speech, _recorder) = recording_speech(false);
    let server = ControlServer::bind("127.0.0.1:0", speech.handle(), true)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run(CancellationToken::new()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut replies = BufReader::new(read).lines();
    write.write_all(b"VOL 0.5\n").await.unwrap();
    assert_eq!(
        replies.next_line().await.unwrap().as_deref(),
        Some("Volume set to 0.5")
    );
    drop(write);
    drop(replies);

    tokio::time::timeout(WAIT, server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, tokio::task::spawn_blocking(move || speech.join()))
        .await
        .unwrap()
        .unwrap();
}
