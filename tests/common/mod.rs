//! In-process stand-ins for the port manager and the orderer.

#![allow(dead_code)]

use rust_evb::config::OrdererConfig;
use rust_evb::network::protocol::{write_reply, Message, Request};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

/// Orderer that records every message and answers from a script.
pub struct MockOrderer {
    pub port: u16,
    pub received: Arc<Mutex<Vec<Message>>>,
    handle: JoinHandle<()>,
}

impl MockOrderer {
    /// Accept one client and reply `OK` to everything.
    pub fn start() -> Self {
        Self::with_replies(|_| "OK".to_string())
    }

    /// Accept one client, answering each request with `reply(request)`.
    pub fn with_replies<F>(reply: F) -> Self
    where
        F: Fn(&Message) -> String + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind mock orderer");
        let port = listener.local_addr().expect("No local address").port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        let handle = thread::spawn(move || {
            let (mut stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };
            while let Ok(message) = Message::read_from(&mut stream) {
                let answer = reply(&message);
                let done = message.request == Request::Disconnect;
                log.lock().push(message);
                if write_reply(&mut stream, &answer).is_err() || done {
                    break;
                }
            }
        });

        Self {
            port,
            received,
            handle,
        }
    }

    /// Wait for the client to go away and return what it sent.
    pub fn finish(self) -> Vec<Message> {
        self.handle.join().expect("Mock orderer panicked");
        let received = self.received.lock();
        received.clone()
    }
}

/// Port manager answering a single `LIST` with a fixed table.
pub struct MockPortManager {
    pub port: u16,
    handle: JoinHandle<String>,
}

impl MockPortManager {
    pub fn start(services: Vec<(u16, String, String)>) -> Self {
        Self::with_status("OK", services)
    }

    pub fn with_status(status: &str, services: Vec<(u16, String, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind mock port manager");
        let port = listener.local_addr().expect("No local address").port();
        let status = status.to_string();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("Port manager accept failed");
            let mut reader = BufReader::new(stream.try_clone().expect("Clone failed"));
            let mut request = String::new();
            reader.read_line(&mut request).expect("Failed to read request");

            let mut writer = stream;
            let mut reply = format!("{}\n{}\n", status, services.len());
            for (port, application, user) in &services {
                reply.push_str(&format!("{} {} {}\n", port, application, user));
            }
            writer.write_all(reply.as_bytes()).expect("Failed to reply");
            request
        });

        Self { port, handle }
    }

    /// The request line the client sent.
    pub fn finish(self) -> String {
        self.handle.join().expect("Mock port manager panicked")
    }
}

pub fn orderer_config(directory_port: u16) -> OrdererConfig {
    OrdererConfig {
        host: "127.0.0.1".to_string(),
        directory_port,
        user: "daq".to_string(),
        instance: None,
        connect_timeout_ms: 2000,
        io_timeout_ms: Some(5000),
    }
}

