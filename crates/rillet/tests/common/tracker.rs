//! Mock of an HTTP tracker.

use std::net::SocketAddr;

use rillet::error::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    spawn,
};

/// Serve a compact peer list to every announce, forever.
pub async fn mock_tracker(peers: Vec<SocketAddr>) -> Result<SocketAddr, Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut body = format!("d8:intervali1800e5:peers{}:", peers.len() * 6).into_bytes();
    for peer in &peers {
        let SocketAddr::V4(peer) = peer else {
            continue;
        };
        body.extend_from_slice(&peer.ip().octets());
        body.extend_from_slice(&peer.port().to_be_bytes());
    }
    body.push(b'e');

    spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();

            spawn(async move {
                let mut req = vec![0u8; 4096];
                let Ok(n) = socket.read(&mut req).await else {
                    return;
                };
                assert!(req[..n].starts_with(b"GET /announce?info_hash="));

                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
            });
        }
    });

    Ok(addr)
}
