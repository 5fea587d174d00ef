#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;

#[derive(Clone)]
pub enum Reply {
    Json(String),
    WithType(&'static str, String),
    Status(u16),
    /// Close the connection without answering.
    Hangup,
}

/// Loopback upstream serving `/treasure/{slot}.json`. Unknown paths answer 404.
pub struct Upstream {
    port: u16,
}

impl Upstream {
    pub fn start(routes: HashMap<String, Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();
        let routes = Arc::new(routes);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else {
                    continue;
                };
                let routes = Arc::clone(&routes);
                thread::spawn(move || serve(stream, &routes));
            }
        });
        Self { port }
    }

    pub fn url_template(&self) -> String {
        format!("http://127.0.0.1:{}/treasure/{{slot}}.json", self.port)
    }
}

fn serve(stream: TcpStream, routes: &HashMap<String, Reply>) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) | Err(_) => break,
            Ok(_) if header == "\r\n" || header == "\n" => break,
            Ok(_) => {}
        }
    }
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();

    let (status, content_type, body) = match routes.get(&path) {
        Some(Reply::Json(body)) => (200, "application/json", body.clone()),
        Some(Reply::WithType(content_type, body)) => (200, *content_type, body.clone()),
        Some(Reply::Status(code)) => (*code, "text/plain", "error".to_string()),
        Some(Reply::Hangup) => return,
        None => (404, "text/plain", "not found".to_string()),
    };
    let response = format!(
        "HTTP/1.1 {status} Fixture\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = reader.into_inner();
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

pub fn slot_path(slot: u8) -> String {
    format!("/treasure/{slot:02}.json")
}

/// Distinct balloon-style readings for every slot in `0..count`.
pub fn distinct_routes(count: u8) -> HashMap<String, Reply> {
    (0..count)
        .map(|slot| {
            let body = format!(
                "[[{}.5, -{}.25, {}.0], [1.0, 2.0, 3.0]]",
                slot,
                slot + 10,
                slot * 3
            );
            (slot_path(slot), Reply::Json(body))
        })
        .collect()
}

pub fn windsnap(home: &Path, upstream: &Upstream) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("windsnap");
    cmd.current_dir(home)
        .env("WINDSNAP_HOME", home)
        .env("WINDSNAP_URL_TEMPLATE", upstream.url_template())
        .env("WINDSNAP_TIMEZONE", "utc")
        .env("WINDSNAP_REQUEST_TIMEOUT_SECS", "5")
        .env("NO_PROXY", "127.0.0.1,localhost")
        .env_remove("HTTP_PROXY")
        .env_remove("HTTPS_PROXY")
        .env_remove("http_proxy")
        .env_remove("https_proxy")
        .env_remove("ALL_PROXY")
        .env_remove("all_proxy");
    cmd
}

/// Stored record file names under `data_dir`, ledger excluded.
pub fn record_names(data_dir: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(data_dir)
        .expect("read data dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".json") && name != "index.json")
        .collect::<Vec<_>>();
    names.sort();
    names
}

pub fn ledger_entries(data_dir: &Path) -> Vec<String> {
    let raw = std::fs::read_to_string(data_dir.join("index.json")).expect("read ledger");
    serde_json::from_str(&raw).expect("parse ledger")
}
