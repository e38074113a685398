//! End-to-end control-channel dialogues against an in-process server bound
//! to `127.0.0.1:0`, covering the scenarios this server's behavior is
//! specified against.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zftpd_core::{Config, Server};

async fn spawn_server(root: std::path::PathBuf) -> std::net::SocketAddr {
    let mut config = Config::default();
    config.root_dir = root;
    config.bind_address = "127.0.0.1".to_string();
    config.port = 0;
    config.auth_failure_delay_secs = 0;
    config.session_timeout_secs = 30;

    let server = Server::new(config).expect("valid config");
    let (listener, addr) = server.bind().await.expect("bind");
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(server.serve(listener, running));
    addr
}

async fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).await.expect("connect");
    stream
}

async fn read_reply(stream: &mut TcpStream) -> String {
    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

async fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(format!("{line}\r\n").as_bytes()).await.expect("write");
}

async fn login(stream: &mut TcpStream) {
    let _greeting = read_reply(stream).await;
    send(stream, "USER anonymous").await;
    let reply = read_reply(stream).await;
    assert!(reply.starts_with("331"), "unexpected USER reply: {reply}");
    send(stream, "PASS anything").await;
    let reply = read_reply(stream).await;
    assert!(reply.starts_with("230"), "unexpected PASS reply: {reply}");
}

#[tokio::test]
async fn s1_path_traversal_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(dir.path().to_path_buf()).await;
    let mut stream = connect(addr).await;
    login(&mut stream).await;

    send(&mut stream, "CWD ../etc").await;
    let reply = read_reply(&mut stream).await;
    assert_eq!(reply, "550 Invalid path.\r\n");
}

#[tokio::test]
async fn s2_anonymous_login_then_pwd() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let addr = spawn_server(root.clone()).await;
    let mut stream = connect(addr).await;
    login(&mut stream).await;

    send(&mut stream, "PWD").await;
    let reply = read_reply(&mut stream).await;
    assert_eq!(reply, format!("257 \"{}\" is current directory.\r\n", root.display()));
}

#[tokio::test]
async fn s3_port_spoofing_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(dir.path().to_path_buf()).await;
    let mut stream = connect(addr).await;
    login(&mut stream).await;

    // The client's real peer address is 127.0.0.1, so a PORT claiming a
    // different endpoint must be rejected.
    send(&mut stream, "PORT 10,0,0,2,0,21").await;
    let reply = read_reply(&mut stream).await;
    assert_eq!(reply, "501 Illegal PORT command.\r\n");
}

#[tokio::test]
async fn s5_pre_auth_command_gating() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(dir.path().to_path_buf()).await;
    let mut stream = connect(addr).await;
    let _greeting = read_reply(&mut stream).await;

    send(&mut stream, "PWD").await;
    let reply = read_reply(&mut stream).await;
    assert_eq!(reply, "530 Please login with USER and PASS.\r\n");
}

#[tokio::test]
async fn s6_failed_auth_lockout() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(dir.path().to_path_buf()).await;
    let mut stream = connect(addr).await;
    let _greeting = read_reply(&mut stream).await;

    for _ in 0..2 {
        send(&mut stream, "USER root").await;
        let reply = read_reply(&mut stream).await;
        assert_eq!(reply, "530 Only anonymous login supported.\r\n");
    }

    send(&mut stream, "USER root").await;
    let reply = read_reply(&mut stream).await;
    assert_eq!(reply, "530 Too many authentication attempts.\r\n");

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "session should have closed the control connection");
}

#[tokio::test]
async fn s4_retr_round_trips_a_stored_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::write(root.join("file.bin"), vec![7u8; 1000]).unwrap();
    let addr = spawn_server(root).await;

    let mut ctrl = connect(addr).await;
    login(&mut ctrl).await;

    send(&mut ctrl, "TYPE I").await;
    let reply = read_reply(&mut ctrl).await;
    assert!(reply.starts_with("200"));

    send(&mut ctrl, "PASV").await;
    let pasv_reply = read_reply(&mut ctrl).await;
    assert!(pasv_reply.starts_with("227"), "unexpected PASV reply: {pasv_reply}");
    let data_addr = parse_pasv(&pasv_reply);

    send(&mut ctrl, "RETR file.bin").await;
    let mut data = TcpStream::connect(data_addr).await.expect("data connect");
    let mut received = Vec::new();
    data.read_to_end(&mut received).await.unwrap();

    let reply = read_reply(&mut ctrl).await;
    assert!(reply.starts_with("226"), "unexpected RETR completion: {reply}");
    assert_eq!(received.len(), 1000);
}

fn parse_pasv(reply: &str) -> std::net::SocketAddr {
    let start = reply.find('(').unwrap() + 1;
    let end = reply.find(')').unwrap();
    let parts: Vec<u16> = reply[start..end].split(',').map(|p| p.parse().unwrap()).collect();
    let ip = std::net::Ipv4Addr::new(parts[0] as u8, parts[1] as u8, parts[2] as u8, parts[3] as u8);
    let port = (parts[4] << 8) | parts[5];
    std::net::SocketAddr::new(std::net::IpAddr::V4(ip), port)
}
