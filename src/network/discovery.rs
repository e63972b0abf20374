//! Service discovery through the port manager.
//!
//! The port manager keeps a table of `(port, application, user)`
//! advertisements. The orderer advertises itself under an application name
//! beginning with [`ORDERER_SERVICE`], optionally qualified by an instance
//! name (`ORDERER:<instance>`).
//!
//! ```text
//! -> LIST\n
//! <- OK\n
//! <- <count>\n
//! <- <port> <application> <user>\n      (count times)
//! ```

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

use super::error::{OrdererError, Result};
use super::protocol::OK_REPLY;

/// Application name prefix the orderer advertises under.
pub const ORDERER_SERVICE: &str = "ORDERER";

/// One advertised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAdvert {
    pub port: u16,
    pub application: String,
    pub user: String,
}

impl ServiceAdvert {
    pub fn new(port: u16, application: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            port,
            application: application.into(),
            user: user.into(),
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let port = fields.next()?.parse().ok()?;
        let application = fields.next()?;
        let user = fields.next()?;
        Some(Self::new(port, application, user))
    }
}

/// Source of service advertisements.
pub trait ServiceDirectory {
    fn list_services(&self) -> Result<Vec<ServiceAdvert>>;
}

/// Directory backed by a running port manager.
#[derive(Debug, Clone)]
pub struct PortManagerDirectory {
    host: String,
    port: u16,
    timeout: Duration,
}

impl PortManagerDirectory {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn open(&self) -> std::io::Result<TcpStream> {
        let mut last_error = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve", self.host),
            )
        }))
    }
}

impl ServiceDirectory for PortManagerDirectory {
    fn list_services(&self) -> Result<Vec<ServiceAdvert>> {
        let refused = |source| OrdererError::ConnectionRefused {
            service: "port manager".to_string(),
            host: self.host.clone(),
            port: self.port,
            source,
        };

        let mut stream = self.open().map_err(refused)?;
        stream.set_read_timeout(Some(self.timeout)).map_err(refused)?;
        stream.write_all(b"LIST\n").map_err(refused)?;

        let mut reader = BufReader::new(stream);
        let status = read_line(&mut reader).map_err(refused)?;
        if status != OK_REPLY {
            return Err(OrdererError::Protocol {
                request: "LIST".to_string(),
                reply: status,
            });
        }

        let count_line = read_line(&mut reader).map_err(refused)?;
        let count: usize = count_line.trim().parse().map_err(|_| OrdererError::Protocol {
            request: "LIST".to_string(),
            reply: format!("bad service count '{}'", count_line),
        })?;

        let mut adverts = Vec::with_capacity(count);
        for _ in 0..count {
            let line = read_line(&mut reader).map_err(refused)?;
            match ServiceAdvert::parse(&line) {
                Some(advert) => adverts.push(advert),
                None => trace!(line = %line, "Skipping malformed service line"),
            }
        }

        debug!(
            host = %self.host,
            port = self.port,
            services = adverts.len(),
            "Listed port manager services"
        );
        Ok(adverts)
    }
}

/// Fixed advertisement table, for tests and for setups without a port
/// manager.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory(pub Vec<ServiceAdvert>);

impl ServiceDirectory for StaticDirectory {
    fn list_services(&self) -> Result<Vec<ServiceAdvert>> {
        Ok(self.0.clone())
    }
}

/// Full application name the orderer is expected to advertise.
pub fn orderer_service_name(instance: Option<&str>) -> String {
    match instance {
        Some(instance) => format!("{}:{}", ORDERER_SERVICE, instance),
        None => ORDERER_SERVICE.to_string(),
    }
}

/// Pick the orderer advertisement for `user`.
///
/// Without an instance any application starting with `ORDERER` matches;
/// with one, the name must be exactly `ORDERER:<instance>`. The first
/// match in directory order wins.
pub fn select_service<'a>(
    adverts: &'a [ServiceAdvert],
    user: &str,
    instance: Option<&str>,
) -> Option<&'a ServiceAdvert> {
    adverts.iter().find(|advert| {
        advert.user == user
            && match instance {
                Some(_) => advert.application == orderer_service_name(instance),
                None => advert.application.starts_with(ORDERER_SERVICE),
            }
    })
}

fn read_line<R: BufRead>(reader: &mut R) -> std::io::Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "port manager closed the connection",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
