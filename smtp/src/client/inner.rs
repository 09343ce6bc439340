use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::{sink::SinkExt, stream::StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_util::codec::Framed;

use crate::codec::SmtpCodec;
use crate::command::Command;
use crate::error::{Error, Rejection, Result};
use crate::response::{Extensions, Reply};

use super::{connect_tls, ClientConfig, Delivery};

/// Runs `fut` to completion, giving up after `timeout` if there is one.
pub(crate) async fn bounded<T, E, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    Error: From<E>,
{
    match timeout {
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(Error::Timeout),
        },
        None => Ok(fut.await?),
    }
}

/// Low-level client over any byte stream. Commands and replies are strictly in lockstep.
pub struct Client<C> {
    framed: Framed<C, SmtpCodec>,
    config: ClientConfig,
    extensions: Extensions,
}

impl<C> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("hostname", &self.config.hostname)
            .field("port", &self.config.port)
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl<C> Client<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(conn: C, config: ClientConfig) -> Self {
        Client {
            framed: Framed::new(conn, SmtpCodec::default()),
            config,
            extensions: Extensions::default(),
        }
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let timeout = self.config.timeout;
        let next = async { self.framed.next().await.unwrap_or(Err(Error::Closed)) };
        bounded(timeout, next).await
    }

    /// The server speaks first; anything but 220 means it doesn't want us.
    pub async fn wait_for_greeting(&mut self) -> Result<Reply> {
        let greeting = self.read_reply().await?;
        debug!("greeting: {}", greeting);
        if greeting.code != 220 {
            return Err(Error::UnexpectedReply {
                command: "<greeting>".to_owned(),
                reply: greeting,
            });
        }
        Ok(greeting)
    }

    pub async fn execute(&mut self, cmd: Command) -> Result<Reply> {
        let timeout = self.config.timeout;
        bounded(timeout, self.framed.send(cmd)).await?;
        self.read_reply().await
    }

    /// Introduces the client and records the advertised extensions, falling back to HELO for
    /// servers that don't know EHLO.
    pub async fn ehlo(&mut self) -> Result<()> {
        let name = self.config.hello_name.clone();
        let reply = self.execute(Command::Ehlo(name.clone())).await?;
        if reply.is_positive() {
            self.extensions = Extensions::from_ehlo(&reply);
            debug!("server extensions: {:?}", self.extensions);
            return Ok(());
        }

        debug!("EHLO refused ({}), trying HELO", reply);
        let reply = self.execute(Command::Helo(name)).await?;
        expect(reply, "HELO", Reply::is_positive)?;
        self.extensions = Extensions::default();
        Ok(())
    }

    pub async fn upgrade(mut self) -> Result<Client<TlsStream<C>>> {
        if !self.extensions.has("STARTTLS") {
            return Err(Error::Unsupported("STARTTLS".to_owned()));
        }

        let reply = self.execute(Command::Starttls).await?;
        expect(reply, "STARTTLS", |r| r.code == 220)?;

        let conn = self.framed.into_inner();
        let timeout = self.config.timeout;
        let stream = bounded(timeout, connect_tls(&self.config.hostname, conn)).await?;
        debug!("upgraded, stream is using TLS now");

        // everything learned before the handshake is discarded
        let mut client = Client::new(stream, self.config);
        client.ehlo().await?;
        Ok(client)
    }

    pub async fn send_mail(
        &mut self,
        from: &str,
        recipients: &[String],
        content: &str,
    ) -> Result<Delivery> {
        let reply = self.execute(Command::MailFrom(from.to_owned())).await?;
        if !reply.is_positive() {
            return Err(Error::SenderRejected(reply));
        }

        let mut delivery = Delivery::default();
        for recipient in recipients {
            let reply = self.execute(Command::RcptTo(recipient.clone())).await?;
            if reply.is_positive() {
                delivery.accepted.push(recipient.clone());
            } else {
                debug!("recipient {:?} rejected: {}", recipient, reply);
                delivery.rejected.push(Rejection {
                    recipient: recipient.clone(),
                    reply,
                });
            }
        }

        if delivery.accepted.is_empty() {
            // abandon the transaction so the session can still be closed politely
            if let Err(err) = self.execute(Command::Rset).await {
                debug!("RSET failed: {}", err);
            }
            return Err(Error::RecipientsRejected(delivery.rejected));
        }

        let reply = self.execute(Command::Data).await?;
        if reply.code != 354 {
            return Err(Error::DataRejected(reply));
        }

        let timeout = self.config.timeout;
        bounded(timeout, self.framed.send(Command::Content(content.to_owned()))).await?;
        let reply = self
            .read_reply()
            .await
            .map_err(|err| Error::Unconfirmed(Box::new(err)))?;
        if !reply.is_positive() {
            return Err(Error::DataRejected(reply));
        }
        debug!("message accepted: {}", reply);

        Ok(delivery)
    }

    /// Ends the session. The server closing the connection early isn't an error at this point.
    pub async fn quit(mut self) -> Result<()> {
        match self.execute(Command::Quit).await {
            Ok(reply) if reply.code != 221 => warn!("unexpected reply to QUIT: {}", reply),
            Ok(_) | Err(Error::Closed) => {}
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

fn expect(reply: Reply, command: &str, ok: impl Fn(&Reply) -> bool) -> Result<Reply> {
    if ok(&reply) {
        Ok(reply)
    } else {
        Err(Error::UnexpectedReply {
            command: command.to_owned(),
            reply,
        })
    }
}
