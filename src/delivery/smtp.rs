//! Delivery over a real SMTP relay.

use async_trait::async_trait;
use chrono::Local;
use panorama_smtp::client::{
    auth::{Auth, Password},
    ClientBuilder, ClientConfig, Delivery,
};

use crate::config::{SmtpConfig, TlsMethod};
use crate::message::ComposedMessage;

use super::{Credentials, DeliveryError, DeliveryReport, Transport};

/// Sends each message over its own SMTP session.
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    /// A transport for the relay described by `config`. Nothing connects until the first send.
    pub fn new(config: SmtpConfig) -> Self {
        SmtpTransport { config }
    }

    fn client_config(&self) -> Result<ClientConfig, DeliveryError> {
        ClientBuilder::default()
            .hostname(self.config.server.clone())
            .port(self.config.port)
            .tls(matches!(self.config.tls, TlsMethod::On))
            .timeout(self.config.timeout())
            .hello_name(self.config.hello_name.clone())
            .build()
            .map_err(|err| DeliveryError::ConnectionFailed(format!("bad smtp config: {}", err)))
    }

    /// The main sequence of steps for one message: connect, secure, log in, send, leave.
    async fn session(
        &self,
        client_config: ClientConfig,
        credentials: &Credentials,
        sender: &str,
        recipients: &[String],
        content: &str,
    ) -> panorama_smtp::Result<Delivery> {
        debug!("connecting to {}:{}", self.config.server, self.config.port);
        let unauth = client_config.open().await?;

        let unauth = if matches!(self.config.tls, TlsMethod::Starttls) {
            debug!("attempting to upgrade");
            let client = unauth.upgrade().await?;
            debug!("upgrade successful");
            client
        } else {
            unauth
        };
        debug!("session encrypted: {}", unauth.is_encrypted());

        debug!("preparing to auth");
        let auth = Password {
            username: credentials.username.clone(),
            password: credentials.secret.clone(),
        };
        let mut authed = auth.perform_auth(unauth).await?;
        debug!("authentication successful!");

        let delivery = authed.send_mail(sender, recipients, content).await?;

        // the message is already queued, a sloppy goodbye doesn't change that
        if let Err(err) = authed.quit().await {
            warn!("error while closing the session: {}", err);
        }
        Ok(delivery)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(
        &self,
        credentials: &Credentials,
        sender: &str,
        recipients: &[String],
        message: &ComposedMessage,
    ) -> Result<DeliveryReport, DeliveryError> {
        let client_config = self.client_config()?;
        let content = message
            .to_rfc5322(Local::now())
            .map_err(|err| DeliveryError::MessageRejected(err.to_string()))?;
        let delivery = self
            .session(client_config, credentials, sender, recipients, &content)
            .await?;

        Ok(DeliveryReport {
            accepted: delivery.accepted,
            rejected: delivery
                .rejected
                .into_iter()
                .map(|r| (r.recipient, r.reply.to_string()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::message::compose;

    /// A relay that answers every command from `replies` and records the envelope lines.
    async fn fake_relay(listener: TcpListener, replies: Vec<&'static str>) -> Vec<String> {
        let (stream, _): (TcpStream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut replies = replies.into_iter();
        let mut seen = Vec::new();
        let mut in_data = false;

        write
            .write_all(replies.next().unwrap().as_bytes())
            .await
            .unwrap();
        while let Ok(Some(line)) = lines.next_line().await {
            if in_data {
                if line != "." {
                    continue;
                }
                in_data = false;
            } else {
                seen.push(line.clone());
            }
            let reply = match replies.next() {
                Some(r) => r,
                None => break,
            };
            if line == "DATA" && reply.starts_with("354") {
                in_data = true;
            }
            write.write_all(reply.as_bytes()).await.unwrap();
        }
        seen
    }

    async fn setup() -> (TcpListener, SmtpTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = SmtpConfig {
            server: "127.0.0.1".to_owned(),
            port: listener.local_addr().unwrap().port(),
            tls: TlsMethod::Off,
            timeout_secs: 5,
            hello_name: "test".to_owned(),
        };
        (listener, SmtpTransport::new(config))
    }

    fn message(recipients: &[&str]) -> ComposedMessage {
        let recipients: Vec<String> = recipients.iter().map(|r| r.to_string()).collect();
        compose("Hello", &"me@x.com".parse().unwrap(), &recipients, "Hi there\n").unwrap()
    }

    async fn send_one(transport: &SmtpTransport) -> Result<DeliveryReport, DeliveryError> {
        transport
            .send(
                &Credentials::new("me", "pw"),
                "me@x.com",
                &["a@x.com".to_owned()],
                &message(&["a@x.com"]),
            )
            .await
    }

    #[tokio::test]
    async fn test_sends_one_session() {
        let (listener, transport) = setup().await;
        let relay = tokio::spawn(fake_relay(
            listener,
            vec![
                "220 relay\r\n",
                "250-relay\r\n250 AUTH PLAIN\r\n",
                "235 ok\r\n",
                "250 ok\r\n",
                "250 ok\r\n",
                "550 no such user\r\n",
                "354 go\r\n",
                "250 queued\r\n",
                "221 bye\r\n",
            ],
        ));

        let recipients = vec!["a@x.com".to_owned(), "gone@y.com".to_owned()];
        let report = transport
            .send(
                &Credentials::new("me", "pw"),
                "me@x.com",
                &recipients,
                &message(&["a@x.com", "gone@y.com"]),
            )
            .await
            .unwrap();

        assert_eq!(report.accepted, vec!["a@x.com"]);
        assert!(report.is_partial());
        assert_eq!(report.rejected[0].0, "gone@y.com");
        assert!(report.rejected[0].1.starts_with("550"));

        let seen = relay.await.unwrap();
        assert_eq!(
            seen,
            vec![
                "EHLO test",
                "AUTH PLAIN AG1lAHB3",
                "MAIL FROM:<me@x.com>",
                "RCPT TO:<a@x.com>",
                "RCPT TO:<gone@y.com>",
                "DATA",
                "QUIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let (listener, transport) = setup().await;
        tokio::spawn(fake_relay(
            listener,
            vec![
                "220 relay\r\n",
                "250-relay\r\n250 AUTH PLAIN\r\n",
                "535 5.7.8 Username and Password not accepted\r\n",
            ],
        ));

        let res = transport
            .send(
                &Credentials::new("me", "wrong"),
                "me@x.com",
                &["a@x.com".to_owned()],
                &message(&["a@x.com"]),
            )
            .await;
        assert_matches!(res, Err(DeliveryError::AuthFailed(reason)) if reason.starts_with("535"));
    }

    #[tokio::test]
    async fn test_everyone_rejected() {
        let (listener, transport) = setup().await;
        tokio::spawn(fake_relay(
            listener,
            vec![
                "220 relay\r\n",
                "250-relay\r\n250 AUTH PLAIN\r\n",
                "235 ok\r\n",
                "250 ok\r\n",
                "550 no\r\n",
                "250 reset\r\n",
            ],
        ));

        let res = transport
            .send(
                &Credentials::new("me", "pw"),
                "me@x.com",
                &["gone@y.com".to_owned()],
                &message(&["gone@y.com"]),
            )
            .await;
        assert_eq!(
            res,
            Err(DeliveryError::RejectedRecipient {
                rejected: vec!["gone@y.com".to_owned()]
            })
        );
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let (listener, transport) = setup().await;
        drop(listener);

        let res = transport
            .send(
                &Credentials::new("me", "pw"),
                "me@x.com",
                &["a@x.com".to_owned()],
                &message(&["a@x.com"]),
            )
            .await;
        assert_matches!(res, Err(DeliveryError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_starttls_required() {
        let (listener, mut transport) = setup().await;
        transport.config.tls = TlsMethod::Starttls;
        tokio::spawn(fake_relay(
            listener,
            vec!["220 relay\r\n", "250-relay\r\n250 AUTH PLAIN\r\n"],
        ));

        let res = transport
            .send(
                &Credentials::new("me", "pw"),
                "me@x.com",
                &["a@x.com".to_owned()],
                &message(&["a@x.com"]),
            )
            .await;
        assert_matches!(res, Err(DeliveryError::ConnectionFailed(reason)) if reason.contains("STARTTLS"));
    }

    #[tokio::test]
    async fn test_message_refused_after_data() {
        let (listener, transport) = setup().await;
        let relay = tokio::spawn(fake_relay(
            listener,
            vec![
                "220 relay\r\n",
                "250-relay\r\n250 AUTH PLAIN\r\n",
                "235 ok\r\n",
                "250 ok\r\n",
                "250 ok\r\n",
                "554 5.7.1 transaction failed\r\n",
            ],
        ));

        let res = send_one(&transport).await;
        assert_matches!(res, Err(DeliveryError::MessageRejected(reason)) if reason.contains("554"));
        // nothing after DATA went out
        assert_eq!(relay.await.unwrap().last().map(String::as_str), Some("DATA"));
    }

    #[tokio::test]
    async fn test_no_auth_mechanism_is_an_auth_failure() {
        let (listener, transport) = setup().await;
        tokio::spawn(fake_relay(
            listener,
            vec!["220 relay\r\n", "250-relay\r\n250 SIZE 1000\r\n"],
        ));

        let res = send_one(&transport).await;
        assert_matches!(res, Err(DeliveryError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn test_lost_verdict_is_unconfirmed() {
        let (listener, transport) = setup().await;
        // hangs up right after the final "."
        tokio::spawn(fake_relay(
            listener,
            vec![
                "220 relay\r\n",
                "250-relay\r\n250 AUTH PLAIN\r\n",
                "235 ok\r\n",
                "250 ok\r\n",
                "250 ok\r\n",
                "354 go\r\n",
            ],
        ));

        let res = send_one(&transport).await;
        assert_matches!(res, Err(DeliveryError::Unconfirmed(_)));
    }
}
