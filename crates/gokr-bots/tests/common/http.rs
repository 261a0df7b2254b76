use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use reqwest::Url;

#[derive(Debug)]
pub struct Recorded {
    pub method: String,
    pub target: String,
    /// Lowercased names, in arrival order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json request body")
    }

    /// Path and query parsed against a dummy origin.
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://localhost{}", self.target)).expect("request target")
    }
}

pub struct Reply {
    pub status: &'static str,
    pub body: String,
}

pub fn reply(status: &'static str, body: impl Into<String>) -> Reply {
    Reply {
        status,
        body: body.into(),
    }
}

fn read_request(stream: &mut TcpStream) -> Recorded {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).expect("request line");
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    let mut content_length = None::<usize>;
    let mut chunked = false;
    loop {
        let mut h = String::new();
        reader.read_line(&mut h).expect("header line");
        let h = h.trim_end();
        if h.is_empty() {
            break;
        }
        let (name, value) = h.split_once(':').expect("header");
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        match name.as_str() {
            "content-length" => content_length = value.parse().ok(),
            "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
            _ => {}
        }
        headers.push((name, value));
    }

    let mut body = Vec::new();
    if chunked {
        loop {
            let mut size = String::new();
            reader.read_line(&mut size).expect("chunk size");
            let size = usize::from_str_radix(size.trim(), 16).expect("hex chunk size");
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk).expect("chunk");
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    } else if let Some(n) = content_length {
        body.resize(n, 0);
        reader.read_exact(&mut body).expect("body");
    }

    Recorded {
        method,
        target,
        headers,
        body,
    }
}

/// Serve `replies.len()` requests, one connection each, answering in order.
pub fn serve(replies: Vec<Reply>) -> (Url, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let mut out = Vec::new();
        for Reply { status, body } in replies {
            let (mut stream, _) = listener.accept().expect("accept");
            let req = read_request(&mut stream);
            let resp = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(resp.as_bytes()).expect("write response");
            out.push(req);
        }
        out
    });
    let url = Url::parse(&format!("http://{addr}/")).expect("url");
    (url, handle)
}

/// Same reply for every one of `n` requests.
pub fn serve_n(n: usize, status: &'static str, body: &str) -> (Url, JoinHandle<Vec<Recorded>>) {
    serve((0..n).map(|_| reply(status, body)).collect())
}
