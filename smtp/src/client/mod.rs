//! SMTP Client
//! ===
//!
//! Like the rest of panorama's protocol clients, the session state lives in the type system: a
//! [`ClientUnauthenticated`] can only be upgraded or authenticated, and only a
//! [`ClientAuthenticated`] can send mail.
//!
//! Start with [`ClientBuilder`] to construct the config, then [`.open`][1] it.
//!
//! Example
//! ---
//!
//! The following example submits one message to `smtp.gmail.com:587` using STARTTLS.
//!
//! ```no_run
//! # use panorama_smtp::Result;
//! # use panorama_smtp::client::{auth::{Auth, Password}, ClientConfigBuilder};
//! # async fn test() -> Result<()> {
//! let config = ClientConfigBuilder::default()
//!     .hostname("smtp.gmail.com".to_owned())
//!     .port(587)
//!     .tls(false)
//!     .build().unwrap();
//! let insecure = config.open().await?;
//! let unauth = insecure.upgrade().await?;
//! let auth = Password { username: "me@gmail.com".to_owned(), password: "hunter2".to_owned() };
//! let mut authed = auth.perform_auth(unauth).await?;
//! authed.send_mail("me@gmail.com", &["you@example.com".to_owned()], "Subject: hi\r\n\r\nhi\r\n").await?;
//! authed.quit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [1]: self::ClientConfig::open

pub mod auth;
mod inner;


use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{
    client::TlsStream, rustls::ClientConfig as RustlsConfig, webpki::DNSNameRef, TlsConnector,
};

use crate::command::Command;
use crate::error::{Error, Rejection, Result};
use crate::response::{Extensions, Reply};

pub use self::inner::Client;

/// Struct used to start building the config for a client.
///
/// Call [`.build`][1] to _build_ the config, then run [`.open`][2] to actually start opening
/// the connection to the server.
///
/// [1]: self::ClientConfigBuilder::build
/// [2]: self::ClientConfig::open
pub type ClientBuilder = ClientConfigBuilder;

/// An SMTP client that hasn't been connected yet.
#[derive(Builder, Clone, Debug)]
pub struct ClientConfig {
    /// The hostname of the SMTP server. Also used as the TLS server name.
    hostname: String,

    /// The port of the SMTP server.
    port: u16,

    /// Whether the connection is encrypted from the start (implicit TLS, usually port 465).
    ///
    /// To upgrade a plaintext connection later, use the upgrade method.
    tls: bool,

    /// Upper bound on every network operation. `None` waits forever.
    #[builder(default)]
    timeout: Option<Duration>,

    /// The name this client introduces itself with in EHLO.
    #[builder(default = "\"localhost\".to_owned()")]
    hello_name: String,
}

impl ClientConfig {
    /// Connects, waits for the greeting and introduces itself.
    pub async fn open(self) -> Result<ClientUnauthenticated> {
        let addr = (self.hostname.as_str(), self.port);
        let conn = inner::bounded(self.timeout, TcpStream::connect(addr)).await?;
        debug!("connected to {}:{}", self.hostname, self.port);

        if self.tls {
            let conn = inner::bounded(self.timeout, connect_tls(&self.hostname, conn)).await?;
            let mut inner = Client::new(conn, self);
            inner.wait_for_greeting().await?;
            inner.ehlo().await?;
            Ok(ClientUnauthenticated::Encrypted(inner))
        } else {
            let mut inner = Client::new(conn, self);
            inner.wait_for_greeting().await?;
            inner.ehlo().await?;
            Ok(ClientUnauthenticated::Unencrypted(inner))
        }
    }
}

pub(crate) async fn connect_tls<C>(hostname: &str, conn: C) -> Result<TlsStream<C>>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut tls_config = RustlsConfig::new();
    tls_config
        .root_store
        .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
    let connector = TlsConnector::from(Arc::new(tls_config));
    let dnsname = DNSNameRef::try_from_ascii_str(hostname)
        .map_err(|err| Error::Tls(format!("bad server name {:?}: {:?}", hostname, err)))?;
    let stream = connector
        .connect(dnsname, conn)
        .await
        .map_err(|err| Error::Tls(err.to_string()))?;
    Ok(stream)
}

/// What happened to each recipient of a successfully submitted message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub accepted: Vec<String>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug)]
pub enum ClientUnauthenticated {
    Encrypted(Client<TlsStream<TcpStream>>),
    Unencrypted(Client<TcpStream>),
}

impl ClientUnauthenticated {
    /// Runs STARTTLS on a plaintext connection.
    pub async fn upgrade(self) -> Result<ClientUnauthenticated> {
        match self {
            // this is a no-op, we don't need to upgrade
            ClientUnauthenticated::Encrypted(_) => Ok(self),
            ClientUnauthenticated::Unencrypted(e) => {
                Ok(ClientUnauthenticated::Encrypted(e.upgrade().await?))
            }
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, ClientUnauthenticated::Encrypted(_))
    }

    /// Exposing low-level execute
    pub(crate) async fn execute(&mut self, cmd: Command) -> Result<Reply> {
        match self {
            ClientUnauthenticated::Encrypted(e) => e.execute(cmd).await,
            ClientUnauthenticated::Unencrypted(e) => e.execute(cmd).await,
        }
    }

    /// What the server advertised in its most recent EHLO reply.
    pub fn extensions(&self) -> &Extensions {
        match self {
            ClientUnauthenticated::Encrypted(e) => e.extensions(),
            ClientUnauthenticated::Unencrypted(e) => e.extensions(),
        }
    }
}

#[derive(Debug)]
pub enum ClientAuthenticated {
    Encrypted(Client<TlsStream<TcpStream>>),
    Unencrypted(Client<TcpStream>),
}

impl ClientAuthenticated {
    /// Runs one mail transaction: MAIL FROM, RCPT TO for each recipient, DATA.
    ///
    /// Recipients the server refuses are reported in the returned [`Delivery`]; the message is
    /// still sent to the rest. If nobody is accepted the transaction is reset and
    /// [`Error::RecipientsRejected`] is returned. A reply to the message itself that never
    /// arrives gives [`Error::Unconfirmed`], since the server may have queued it anyway.
    pub async fn send_mail(
        &mut self,
        from: &str,
        recipients: &[String],
        content: &str,
    ) -> Result<Delivery> {
        match self {
            ClientAuthenticated::Encrypted(e) => e.send_mail(from, recipients, content).await,
            ClientAuthenticated::Unencrypted(e) => e.send_mail(from, recipients, content).await,
        }
    }

    pub async fn quit(self) -> Result<()> {
        match self {
            ClientAuthenticated::Encrypted(e) => e.quit().await,
            ClientAuthenticated::Unencrypted(e) => e.quit().await,
        }
    }
}
