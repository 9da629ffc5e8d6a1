//! Local upstream fakes for transport and handler tests

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HOST, PROXY_AUTHORIZATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Echo the request target in the body and the seen headers in `x-seen-*`
fn echo_response(req: &Request<Incoming>, extra: Option<&str>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(req.uri().to_string())));
    let headers = resp.headers_mut();
    if let Some(auth) = req.headers().get(PROXY_AUTHORIZATION) {
        headers.insert("x-seen-auth", auth.clone());
    }
    if let Some(host) = req.headers().get(HOST) {
        headers.insert("x-seen-host", host.clone());
    }
    if let Some(target) = extra.and_then(|t| t.parse().ok()) {
        headers.insert("x-socks-target", target);
    }
    headers.insert("proxy-agent", "fake".parse().unwrap());
    headers.insert("x-app", "relay".parse().unwrap());
    resp
}

async fn serve_echo(stream: TcpStream, socks_target: Option<String>) {
    let service = service_fn(move |req: Request<Incoming>| {
        let target = socks_target.clone();
        async move { Ok::<_, Infallible>(echo_response(&req, target.as_deref())) }
    });
    let _ = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await;
}

/// HTTP forward proxy stand-in that answers every request itself
pub async fn spawn_forward_proxy() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_echo(stream, None));
        }
    });
    addr
}

/// No-auth SOCKS5 proxy whose tunnel ends in an echoing HTTP origin
pub async fn spawn_socks5_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Some(target) = socks5_handshake(&mut stream).await {
                    serve_echo(stream, Some(target)).await;
                }
            });
        }
    });
    addr
}

async fn socks5_handshake(stream: &mut TcpStream) -> Option<String> {
    // greeting: VER NMETHODS METHODS
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.ok()?;
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await.ok()?;
    stream.write_all(&[0x05, 0x00]).await.ok()?;

    // request: VER CMD RSV ATYP
    let mut req = [0u8; 4];
    stream.read_exact(&mut req).await.ok()?;
    let host = match req[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await.ok()?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.ok()?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await.ok()?;
            String::from_utf8(name).ok()?
        }
        _ => return None,
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await.ok()?;

    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .ok()?;
    Some(format!("{}:{}", host, u16::from_be_bytes(port)))
}

/// Accepts connections and never answers
pub async fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Address nothing listens on
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
