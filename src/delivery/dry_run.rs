//! Printing messages instead of sending them.

use std::io::{self, Write};

use async_trait::async_trait;
use chrono::Local;
use parking_lot::Mutex;

use crate::message::ComposedMessage;

use super::{Credentials, DeliveryError, DeliveryReport, Transport};

/// Writes each message out instead of sending it. Every recipient counts as accepted.
pub struct DryRun<W = io::Stdout> {
    out: Mutex<W>,
}

impl DryRun {
    /// Writes to standard output.
    pub fn stdout() -> Self {
        DryRun::new(io::stdout())
    }
}

impl<W: Write> DryRun<W> {
    /// Writes to `out`.
    pub fn new(out: W) -> Self {
        DryRun {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl<W: Write + Send> Transport for DryRun<W> {
    async fn send(
        &self,
        _credentials: &Credentials,
        sender: &str,
        recipients: &[String],
        message: &ComposedMessage,
    ) -> Result<DeliveryReport, DeliveryError> {
        let raw = message
            .to_rfc5322(Local::now())
            .map_err(|err| DeliveryError::MessageRejected(err.to_string()))?;
        let mut out = self.out.lock();
        writeln!(out, "---- from {} to {}", sender, recipients.join(", "))
            .and_then(|_| out.write_all(raw.replace("\r\n", "\n").as_bytes()))
            .and_then(|_| out.flush())
            .map_err(|err| DeliveryError::ConnectionFailed(err.to_string()))?;
        Ok(DeliveryReport::all(recipients))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::compose;

    #[tokio::test]
    async fn test_writes_instead_of_sending() {
        let mut buf = Vec::new();
        let recipients = vec!["a@x.com".to_owned(), "b@y.com".to_owned()];
        let sender = "me@x.com".parse().unwrap();
        let msg = compose("Hello", &sender, &recipients, "Hi Alice\n").unwrap();

        {
            let dry = DryRun::new(&mut buf);
            let report = dry
                .send(&Credentials::new("me", "pw"), "me@x.com", &recipients, &msg)
                .await
                .unwrap();
            assert_eq!(report, DeliveryReport::all(&recipients));
        }

        let out = String::from_utf8(buf).unwrap();
        assert!(out.starts_with("---- from me@x.com to a@x.com, b@y.com\n"));
        assert!(out.contains("Subject: Hello\n"));
        assert!(out.contains("Hi Alice"));
        assert!(!out.contains('\r'));
        assert!(!out.contains("pw"));
    }
}
