//! Synchronous orderer client.
//!
//! The client is `Disconnected` until [`OrdererClient::connect`] succeeds
//! and returns to `Disconnected` after [`OrdererClient::disconnect`]. Each
//! call sends one request and waits for its reply, so at most one request
//! is ever in flight on the socket.

use bytes::Bytes;
use evb_core::FragmentChain;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use tracing::{debug, info, instrument, warn};

use super::discovery::{orderer_service_name, select_service, PortManagerDirectory, ServiceDirectory};
use super::error::{OrdererError, Result};
use super::protocol::{read_reply, ConnectBody, Message, Request, OK_REPLY};
use crate::config::OrdererConfig;

/// Client for the submission side of the orderer protocol.
///
/// Methods take `&mut self`; share a client between threads behind a
/// mutex.
pub struct OrdererClient<D: ServiceDirectory = PortManagerDirectory> {
    config: OrdererConfig,
    directory: D,
    stream: Option<TcpStream>,
}

impl OrdererClient<PortManagerDirectory> {
    /// Client that discovers the orderer through the configured port
    /// manager.
    pub fn new(config: OrdererConfig) -> Self {
        let directory = PortManagerDirectory::new(
            config.host.clone(),
            config.directory_port,
            config.connect_timeout(),
        );
        Self::with_directory(config, directory)
    }
}

impl<D: ServiceDirectory> OrdererClient<D> {
    pub fn with_directory(config: OrdererConfig, directory: D) -> Self {
        Self {
            config,
            directory,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn config(&self) -> &OrdererConfig {
        &self.config
    }

    /// Locate the orderer, open a connection and register as a source.
    ///
    /// `source_ids` lists every source id this client will submit for.
    #[instrument(skip(self, source_ids), fields(sources = source_ids.len()))]
    pub fn connect(&mut self, description: &str, source_ids: &[u32]) -> Result<()> {
        if self.stream.is_some() {
            return Err(OrdererError::AlreadyConnected);
        }

        let port = self.lookup_port()?;
        let mut stream = self.open(port)?;

        let body = ConnectBody::new(description, source_ids).encode()?;
        Self::transact(&mut stream, Request::Connect, body).map_err(|e| match e {
            OrdererError::Transport(source) => self.refused(port, source),
            other => other,
        })?;

        info!(
            host = %self.config.host,
            port,
            source_ids = ?source_ids,
            "Connected to orderer"
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Submit one batch of fragments.
    ///
    /// An empty chain is accepted without contacting the orderer.
    pub fn submit_fragments(&mut self, chain: &FragmentChain<'_>) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(OrdererError::NotConnected)?;
        if chain.is_empty() {
            return Ok(());
        }

        let body = chain.encode()?;
        let bytes = body.len();
        Self::transact(stream, Request::Fragments, body)?;

        debug!(fragments = chain.len(), bytes, "Submitted fragments");
        Ok(())
    }

    /// Deregister and close the connection.
    ///
    /// The socket is released whether or not the orderer acknowledges.
    pub fn disconnect(&mut self) -> Result<()> {
        let mut stream = self.stream.take().ok_or(OrdererError::NotConnected)?;
        let result = Self::transact(&mut stream, Request::Disconnect, Bytes::new());
        match &result {
            Ok(()) => info!("Disconnected from orderer"),
            Err(e) => warn!(error = %e, "Orderer disconnect failed"),
        }
        result
    }

    fn lookup_port(&self) -> Result<u16> {
        let adverts = self.directory.list_services()?;
        let instance = self.config.instance.as_deref();
        let advert = select_service(&adverts, &self.config.user, instance).ok_or_else(|| {
            OrdererError::ServiceNotFound {
                service: orderer_service_name(instance),
                user: self.config.user.clone(),
            }
        })?;
        debug!(port = advert.port, application = %advert.application, "Found orderer");
        Ok(advert.port)
    }

    fn refused(&self, port: u16, source: std::io::Error) -> OrdererError {
        OrdererError::ConnectionRefused {
            service: orderer_service_name(self.config.instance.as_deref()),
            host: self.config.host.clone(),
            port,
            source,
        }
    }

    fn open(&self, port: u16) -> Result<TcpStream> {
        let refused = |source| self.refused(port, source);

        let addrs: Vec<SocketAddr> = (self.config.host.as_str(), port)
            .to_socket_addrs()
            .map_err(refused)?
            .collect();

        let mut last_error = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{} did not resolve", self.config.host),
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout()) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(refused)?;
                    stream
                        .set_read_timeout(self.config.io_timeout())
                        .map_err(refused)?;
                    stream
                        .set_write_timeout(self.config.io_timeout())
                        .map_err(refused)?;
                    return Ok(stream);
                }
                Err(e) => last_error = e,
            }
        }
        Err(refused(last_error))
    }

    fn transact(stream: &mut TcpStream, request: Request, body: Bytes) -> Result<()> {
        Message::new(request, body).write_to(stream)?;
        let reply = read_reply(stream)?;
        if reply != OK_REPLY {
            return Err(OrdererError::Protocol {
                request: request.as_str().to_string(),
                reply,
            });
        }
        Ok(())
    }
}

impl<D: ServiceDirectory> std::fmt::Debug for OrdererClient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrdererClient")
            .field("host", &self.config.host)
            .field("instance", &self.config.instance)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::discovery::{ServiceAdvert, StaticDirectory};
    use crate::network::protocol::write_reply;
    use evb_core::Fragment;
    use std::net::TcpListener;
    use std::thread;
    use tracing_test::traced_test;

    fn client(adverts: Vec<ServiceAdvert>) -> OrdererClient<StaticDirectory> {
        let config = OrdererConfig {
            user: "daq".to_string(),
            ..OrdererConfig::default()
        };
        OrdererClient::with_directory(config, StaticDirectory(adverts))
    }

    #[test]
    fn test_operations_require_connection() {
        let mut client = client(Vec::new());
        let fragment = Fragment::new(1, 1, vec![0u8; 4]);
        let chain: FragmentChain<'_> = std::iter::once(&fragment).collect();

        assert!(matches!(
            client.submit_fragments(&chain),
            Err(OrdererError::NotConnected)
        ));
        assert!(matches!(client.disconnect(), Err(OrdererError::NotConnected)));
    }

    #[test]
    fn test_connect_without_advert_is_service_not_found() {
        let mut client = client(vec![ServiceAdvert::new(4000, "ORDERER", "someone-else")]);
        match client.connect("test", &[1]) {
            Err(OrdererError::ServiceNotFound { service, user }) => {
                assert_eq!(service, "ORDERER");
                assert_eq!(user, "daq");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!client.is_connected());
    }

    #[test]
    #[traced_test]
    fn test_rejected_disconnect_is_logged_and_releases_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let orderer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            while let Ok(message) = Message::read_from(&mut stream) {
                let done = message.request == Request::Disconnect;
                let reply = if done { "ERROR not registered" } else { "OK" };
                write_reply(&mut stream, reply).unwrap();
                if done {
                    break;
                }
            }
        });

        let config = OrdererConfig {
            host: "127.0.0.1".to_string(),
            user: "daq".to_string(),
            ..OrdererConfig::default()
        };
        let directory = StaticDirectory(vec![ServiceAdvert::new(port, "ORDERER", "daq")]);
        let mut client = OrdererClient::with_directory(config, directory);
        client.connect("test", &[1]).unwrap();

        match client.disconnect() {
            Err(OrdererError::Protocol { request, reply }) => {
                assert_eq!(request, "DISCONNECT");
                assert_eq!(reply, "ERROR not registered");
            }
            other => panic!("Expected Protocol, got {:?}", other),
        }
        assert!(!client.is_connected());
        assert!(logs_contain("Orderer disconnect failed"));
        orderer.join().unwrap();
    }
}
