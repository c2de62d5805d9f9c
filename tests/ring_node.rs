//! End-to-end tests: a real node on loopback, driven over TCP and UDP.
//!
//! Test-owned UDP sockets play the successor and other ring members.

use ringdht::{pseudo_hash, Node, NodeInfo, NodeSettings, RingMessage, MESSAGE_SIZE};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn localhost(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(v6) => panic!("expected IPv4, got {v6}"),
    }
}

fn settings(self_id: u16, pred_id: u16, successor: Option<NodeInfo>) -> NodeSettings {
    NodeSettings {
        pred_id,
        successor,
        ..NodeSettings::standalone(localhost(0), self_id)
    }
}

fn alone() -> NodeSettings {
    NodeSettings::standalone(localhost(0), 100)
}

async fn start(settings: NodeSettings) -> SocketAddrV4 {
    let mut node = Node::bind(settings).await.unwrap();
    let addr = node.local_addr();
    tokio::spawn(async move { node.run().await });
    addr
}

async fn udp_peer() -> (UdpSocket, SocketAddrV4) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = v4(socket.local_addr().unwrap());
    (socket, addr)
}

async fn recv_message(socket: &UdpSocket) -> (RingMessage, SocketAddr) {
    let mut buf = [0u8; 64];
    let (len, from) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("no datagram arrived")
        .unwrap();
    assert_eq!(len, MESSAGE_SIZE);
    (RingMessage::decode(&buf[..len]).unwrap(), from)
}

#[derive(Debug)]
struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    async fn connect(addr: SocketAddrV4) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    async fn send(&mut self, raw: &[u8]) {
        self.reader.get_mut().write_all(raw).await.unwrap();
    }

    async fn response(&mut self) -> HttpResponse {
        timeout(WAIT, self.read_response())
            .await
            .expect("no response arrived")
    }

    async fn read_response(&mut self) -> HttpResponse {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        let status = line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or_else(|| panic!("bad status line {line:?}"));

        let mut headers = Vec::new();
        loop {
            line.clear();
            self.reader.read_line(&mut line).await.unwrap();
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            let (key, value) = trimmed.split_once(": ").unwrap();
            headers.push((key.to_string(), value.to_string()));
        }

        let mut response = HttpResponse {
            status,
            headers,
            body: Vec::new(),
        };
        let len: usize = response
            .header("Content-Length")
            .map(|value| value.parse().unwrap())
            .unwrap_or(0);
        response.body = vec![0u8; len];
        self.reader.read_exact(&mut response.body).await.unwrap();
        response
    }

    async fn request(&mut self, raw: &str) -> HttpResponse {
        self.send(raw.as_bytes()).await;
        self.response().await
    }

    async fn is_closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(
            timeout(WAIT, self.reader.read(&mut byte)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

fn get(uri: &str) -> String {
    format!("GET {uri} HTTP/1.1\r\n\r\n")
}

#[tokio::test]
async fn single_node_serves_static_resource() {
    let addr = start(alone()).await;
    let mut client = Client::connect(addr).await;

    let response = client.request(&get("/static/foo")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"Foo");
}

#[tokio::test]
async fn put_put_get() {
    let addr = start(alone()).await;
    let mut client = Client::connect(addr).await;

    let created = client
        .request("PUT /x HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi")
        .await;
    assert_eq!(created.status, 201);
    let replaced = client
        .request("PUT /x HTTP/1.1\r\nContent-Length: 2\r\n\r\nlo")
        .await;
    assert_eq!(replaced.status, 204);

    let response = client.request(&get("/x")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"lo");
}

#[tokio::test]
async fn delete_then_get() {
    let addr = start(alone()).await;
    let mut client = Client::connect(addr).await;

    let deleted = client.request("DELETE /static/bar HTTP/1.1\r\n\r\n").await;
    assert_eq!(deleted.status, 204);
    assert_eq!(client.request(&get("/static/bar")).await.status, 404);
    assert_eq!(
        client
            .request("DELETE /static/bar HTTP/1.1\r\n\r\n")
            .await
            .status,
        404
    );
}

#[tokio::test]
async fn successor_owned_key_redirects_to_successor() {
    let hash = pseudo_hash(b"/next");
    let self_id = hash.wrapping_sub(5);
    let successor = NodeInfo {
        id: hash.wrapping_add(5),
        addr: localhost(9),
    };
    let addr = start(settings(self_id, self_id.wrapping_sub(100), Some(successor))).await;
    let mut client = Client::connect(addr).await;

    let response = client.request(&get("/next")).await;
    assert_eq!(response.status, 303);
    assert_eq!(response.header("Location"), Some("http://127.0.0.1:9/next"));
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn unknown_owner_defers_then_redirects_once() {
    let uri = "/far";
    let hash = pseudo_hash(uri.as_bytes());
    let (successor_socket, successor_addr) = udp_peer().await;
    let self_id = hash.wrapping_add(1000);
    let addr = start(settings(
        self_id,
        hash.wrapping_add(500),
        Some(NodeInfo {
            id: hash.wrapping_add(2000),
            addr: successor_addr,
        }),
    ))
    .await;
    let mut client = Client::connect(addr).await;

    let deferred = client.request(&get(uri)).await;
    assert_eq!(deferred.status, 503);
    assert_eq!(deferred.header("Retry-After"), Some("1"));

    let (lookup, from) = recv_message(&successor_socket).await;
    assert_eq!(v4(from), addr);
    assert_eq!(
        lookup,
        RingMessage::Lookup {
            hash,
            origin: NodeInfo { id: self_id, addr },
        }
    );

    let owner = NodeInfo {
        id: hash,
        addr: localhost(7777),
    };
    let reply = RingMessage::Reply {
        predecessor_id: hash.wrapping_sub(1),
        owner,
    };
    successor_socket
        .send_to(&reply.encode(), SocketAddr::V4(addr))
        .await
        .unwrap();

    // retry the way a client honoring Retry-After would
    let mut redirected = None;
    for _ in 0..100 {
        let response = client.request(&get(uri)).await;
        if response.status == 303 {
            redirected = Some(response);
            break;
        }
        assert_eq!(response.status, 503);
        sleep(Duration::from_millis(10)).await;
    }
    let redirected = redirected.expect("reply never reached the node");
    assert_eq!(redirected.header("Location"), Some("http://127.0.0.1:7777/far"));

    // the reply was used up
    assert_eq!(client.request(&get(uri)).await.status, 503);
}

#[tokio::test]
async fn malformed_request_gets_400_and_close() {
    let addr = start(alone()).await;
    let mut client = Client::connect(addr).await;

    client.send(b"garbage\r\n\r\n").await;
    assert_eq!(client.response().await.status, 400);
    assert!(client.is_closed().await);

    // the node accepts the next client
    let mut next = Client::connect(addr).await;
    assert_eq!(next.request(&get("/static/baz")).await.body, b"Baz");
}

#[tokio::test]
async fn pipelined_requests_and_connection_close() {
    let addr = start(alone()).await;
    let mut client = Client::connect(addr).await;

    client
        .send(
            b"GET /static/foo HTTP/1.1\r\n\r\n\
              GET /static/bar HTTP/1.1\r\nConnection: close\r\n\r\n\
              GET /static/baz HTTP/1.1\r\n\r\n",
        )
        .await;
    assert_eq!(client.response().await.body, b"Foo");
    assert_eq!(client.response().await.body, b"Bar");
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn request_split_across_writes() {
    let addr = start(alone()).await;
    let mut client = Client::connect(addr).await;

    client.send(b"PUT /split HTTP/1.1\r\nContent-Le").await;
    sleep(Duration::from_millis(20)).await;
    client.send(b"ngth: 4\r\n\r\nab").await;
    sleep(Duration::from_millis(20)).await;
    client.send(b"cd").await;
    assert_eq!(client.response().await.status, 201);
    assert_eq!(client.request(&get("/split")).await.body, b"abcd");
}

#[tokio::test]
async fn second_client_waits_for_the_first() {
    let addr = start(alone()).await;
    let mut first = Client::connect(addr).await;
    assert_eq!(first.request(&get("/static/foo")).await.status, 200);

    let mut second = Client::connect(addr).await;
    second.send(get("/static/bar").as_bytes()).await;
    assert!(
        timeout(Duration::from_millis(200), second.read_response())
            .await
            .is_err(),
        "second client was served while the first was connected"
    );

    drop(first);
    assert_eq!(second.response().await.body, b"Bar");
}

#[tokio::test]
async fn lookups_are_answered_or_relayed() {
    let (successor_socket, successor_addr) = udp_peer().await;
    let (origin_socket, origin_addr) = udp_peer().await;
    let successor = NodeInfo {
        id: 2000,
        addr: successor_addr,
    };
    let addr = start(settings(1000, 500, Some(successor))).await;
    let node = SocketAddr::V4(addr);
    let origin = NodeInfo {
        id: 40000,
        addr: origin_addr,
    };

    // neither we nor the successor: relayed unchanged
    let lookup = RingMessage::Lookup {
        hash: 30000,
        origin,
    };
    origin_socket.send_to(&lookup.encode(), node).await.unwrap();
    assert_eq!(recv_message(&successor_socket).await.0, lookup);

    // junk is dropped and the node keeps going
    origin_socket.send_to(b"\x00\x01", node).await.unwrap();
    origin_socket.send_to(&[9u8; MESSAGE_SIZE], node).await.unwrap();

    // successor's slice
    let lookup = RingMessage::Lookup { hash: 1500, origin };
    origin_socket.send_to(&lookup.encode(), node).await.unwrap();
    assert_eq!(
        recv_message(&origin_socket).await.0,
        RingMessage::Reply {
            predecessor_id: 1000,
            owner: successor,
        }
    );

    // our own slice
    let lookup = RingMessage::Lookup { hash: 700, origin };
    origin_socket.send_to(&lookup.encode(), node).await.unwrap();
    assert_eq!(
        recv_message(&origin_socket).await.0,
        RingMessage::Reply {
            predecessor_id: 500,
            owner: NodeInfo { id: 1000, addr },
        }
    );
}
