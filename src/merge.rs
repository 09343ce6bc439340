//! The batch driver.
//!
//! A [`Merger`] walks the placeholder table in order and, for every record, renders the template,
//! composes a message and hands it to its [`Transport`]. Sends are strictly sequential; the first
//! delivery error ends the run.

use lettre::message::Mailbox;

use crate::delivery::{Credentials, DeliveryError, Transport};
use crate::message::{compose, split_recipients};
use crate::table::PlaceholderTable;
use crate::template::{RenderError, Template};

/// What happens to a record that doesn't fill every placeholder.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionPolicy {
    /// Log the mismatch and skip the record
    Strict,

    /// Log the mismatch and send the partially filled body anyway
    BestEffort,
}

impl Default for SubstitutionPolicy {
    fn default() -> Self {
        SubstitutionPolicy::BestEffort
    }
}

/// Knobs for one [`Merger`].
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// What to do with records that leave placeholders unfilled
    pub policy: SubstitutionPolicy,
    /// Separates addresses inside the recipient cell
    pub delimiter: char,
    /// Drop empty entries such as the one in `a@x.com;;b@y.com`
    pub drop_empty_recipients: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            policy: SubstitutionPolicy::default(),
            delimiter: ';',
            drop_empty_recipients: true,
        }
    }
}

/// Where a [`Merger`] is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeState {
    /// Nothing loaded yet
    Idle,

    /// Table and template in memory
    Loaded,

    /// Working on this row, counting from 1 like [`LoadError::RowTooLong`]
    ///
    /// [`LoadError::RowTooLong`]: crate::table::LoadError::RowTooLong
    Sending(usize),

    /// Every row was handled
    Done,

    /// A delivery error stopped the last run
    Failed,
}

/// Counts from one finished run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Messages the relay took
    pub sent: usize,
    /// Rows that were never sent: unfilled under the strict policy, bad addresses, no recipients
    pub skipped: usize,

    /// Sent, but with some recipients rejected
    pub partial: usize,
}

/// Why a run stopped.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// [`Merger::run`] before [`Merger::load`]
    #[error("nothing to merge, load a table and a template first")]
    NotLoaded,

    /// The transport gave up on a message; later rows were not attempted
    #[error("delivery failed at row {row}: {source}")]
    Delivery {
        /// The failed row, counting from 1
        row: usize,
        /// What the transport reported
        #[source]
        source: DeliveryError,
    },
}

/// Sends one message per table row through a [`Transport`].
pub struct Merger<T> {
    transport: T,
    credentials: Credentials,
    sender: Mailbox,
    subject: String,
    options: MergeOptions,
    state: MergeState,
    work: Option<(PlaceholderTable, Template)>,
}

impl<T: Transport> Merger<T> {
    /// A merger with nothing loaded.
    pub fn new(
        transport: T,
        credentials: Credentials,
        sender: Mailbox,
        subject: impl Into<String>,
        options: MergeOptions,
    ) -> Self {
        Merger {
            transport,
            credentials,
            sender,
            subject: subject.into(),
            options,
            state: MergeState::Idle,
            work: None,
        }
    }

    /// Takes the work for the next [`run`](Merger::run), replacing anything loaded before.
    pub fn load(&mut self, table: PlaceholderTable, template: Template) {
        self.work = Some((table, template));
        self.state = MergeState::Loaded;
    }

    /// Where the merger is now.
    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Sends one message per record. Running again after [`MergeState::Done`] sends everything
    /// again; nothing remembers who already got mail.
    pub async fn run(&mut self) -> Result<MergeSummary, MergeError> {
        let (table, template) = match &self.work {
            Some((table, template)) => (table, template),
            None => return Err(MergeError::NotLoaded),
        };
        let mut summary = MergeSummary::default();

        for (i, record) in table.records().iter().enumerate() {
            let row = i + 1;
            self.state = MergeState::Sending(row);
            let excluding = [record.recipient_key()];

            let body = match template.render(record, &excluding) {
                Ok(body) => body,
                Err(RenderError::ColumnMismatch { missing, partial }) => {
                    error!(
                        "row {}: columns mismatch between the placeholder table and the template, no value for {:?}",
                        row, missing
                    );
                    match self.options.policy {
                        SubstitutionPolicy::Strict => {
                            summary.skipped += 1;
                            continue;
                        }
                        SubstitutionPolicy::BestEffort => partial,
                    }
                }
            };

            let unused = template.unused_columns(record, &excluding);
            if !unused.is_empty() {
                debug!("row {}: columns not used by the template: {:?}", row, unused);
            }

            let recipients = split_recipients(
                record.recipients(),
                self.options.delimiter,
                self.options.drop_empty_recipients,
            );
            if recipients.iter().all(String::is_empty) {
                warn!("row {}: no recipients, skipping", row);
                summary.skipped += 1;
                continue;
            }

            let message = match compose(self.subject.as_str(), &self.sender, &recipients, body) {
                Ok(message) => message,
                Err(err) => {
                    error!("row {}: {}, skipping", row, err);
                    summary.skipped += 1;
                    continue;
                }
            };
            let envelope = message.envelope_recipients();
            info!("email generated for {}", envelope.join(", "));

            let res = self
                .transport
                .send(&self.credentials, &message.envelope_sender(), &envelope, &message)
                .await;
            match res {
                Ok(report) => {
                    if report.is_partial() {
                        for (recipient, reason) in report.rejected.iter() {
                            warn!("row {}: {} rejected: {}", row, recipient, reason);
                        }
                        summary.partial += 1;
                    }
                    info!("email sent to {}", report.accepted.join(", "));
                    summary.sent += 1;
                }
                Err(err) => {
                    error!("row {}: {}", row, err);
                    self.state = MergeState::Failed;
                    return Err(MergeError::Delivery { row, source: err });
                }
            }
        }

        self.state = MergeState::Done;
        info!(
            "merge finished: {} sent, {} skipped, {} partially rejected",
            summary.sent, summary.skipped, summary.partial
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::delivery::tests::MockTransport;
    use crate::delivery::DeliveryReport;

    const TEMPLATE: &str = "Dear {name},\n\nyour new password is {password}.\n";

    fn table(csv: &str) -> PlaceholderTable {
        PlaceholderTable::from_reader(csv.as_bytes(), "email").unwrap()
    }

    fn merger<'a>(mock: &'a MockTransport, options: MergeOptions) -> Merger<&'a MockTransport> {
        Merger::new(
            mock,
            Credentials::new("me@x.com", "hunter2"),
            "me@x.com".parse().unwrap(),
            "New password",
            options,
        )
    }

    fn three_rows() -> PlaceholderTable {
        table(
            "email,name,password\n\
             a@x.com,Alice,pw1\n\
             b@x.com;c@y.com,Bob,pw2\n\
             d@x.com,Dana,pw3\n",
        )
    }

    #[tokio::test]
    async fn test_not_loaded() {
        let mock = MockTransport::default();
        let mut merger = merger(&mock, MergeOptions::default());
        assert_eq!(merger.state(), MergeState::Idle);
        assert_matches!(merger.run().await, Err(MergeError::NotLoaded));
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_sends_every_row_in_order() {
        let mock = MockTransport::default();
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(three_rows(), Template::parse(TEMPLATE).unwrap());
        assert_eq!(merger.state(), MergeState::Loaded);

        let summary = merger.run().await.unwrap();
        assert_eq!(summary.sent, 3);
        assert_eq!(merger.state(), MergeState::Done);

        let sent = mock.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].envelope_recipients(), vec!["a@x.com"]);
        assert_eq!(sent[1].envelope_recipients(), vec!["b@x.com", "c@y.com"]);
        assert_eq!(sent[2].envelope_recipients(), vec!["d@x.com"]);
        assert_eq!(sent[0].body, "Dear Alice,\n\nyour new password is pw1.\n");
        assert_ne!(sent[0].body, sent[1].body);
        assert_ne!(sent[1].body, sent[2].body);
        for msg in sent.iter() {
            assert_eq!(msg.subject, "New password");
            assert_eq!(msg.envelope_sender(), "me@x.com");
            assert!(!msg.body.contains('{'));
        }
    }

    #[tokio::test]
    async fn test_best_effort_still_sends_mismatched_row() {
        let mock = MockTransport::default();
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(
            table("email,name\na@x.com,Alice\n"),
            Template::parse(TEMPLATE).unwrap(),
        );

        let summary = merger.run().await.unwrap();
        assert_eq!(summary.sent, 1);

        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        // the unfilled placeholder goes out verbatim
        assert_eq!(sent[0].body, "Dear Alice,\n\nyour new password is {password}.\n");
    }

    #[tokio::test]
    async fn test_strict_skips_mismatched_row() {
        let mock = MockTransport::default();
        let options = MergeOptions {
            policy: SubstitutionPolicy::Strict,
            ..MergeOptions::default()
        };
        let mut merger = merger(&mock, options);
        merger.load(
            table("email,name\na@x.com,Alice\nb@x.com,Bob\n"),
            Template::parse(TEMPLATE).unwrap(),
        );

        let summary = merger.run().await.unwrap();
        assert_eq!(
            summary,
            MergeSummary {
                sent: 0,
                skipped: 2,
                partial: 0
            }
        );
        assert!(mock.sent().is_empty());
        assert_eq!(merger.state(), MergeState::Done);
    }

    #[tokio::test]
    async fn test_failure_stops_the_run() {
        let mock = MockTransport::failing_with(vec![
            Ok(DeliveryReport::all(&["a@x.com".to_owned()])),
            Err(DeliveryError::ConnectionFailed("reset by peer".to_owned())),
        ]);
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(three_rows(), Template::parse(TEMPLATE).unwrap());

        let err = merger.run().await.unwrap_err();
        assert_matches!(
            err,
            MergeError::Delivery {
                row: 2,
                source: DeliveryError::ConnectionFailed(_)
            }
        );
        assert_eq!(merger.state(), MergeState::Failed);

        // row 3 was never attempted
        let sent = mock.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.envelope_recipients() != vec!["d@x.com"]));
    }

    #[tokio::test]
    async fn test_rerun_sends_everything_again() {
        let mock = MockTransport::default();
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(three_rows(), Template::parse(TEMPLATE).unwrap());

        merger.run().await.unwrap();
        assert_eq!(merger.state(), MergeState::Done);
        merger.run().await.unwrap();
        assert_eq!(merger.state(), MergeState::Done);

        let sent = mock.sent();
        assert_eq!(sent.len(), 6);
        assert_eq!(sent[..3], sent[3..]);
    }

    #[tokio::test]
    async fn test_partial_rejection_is_not_fatal() {
        let mock = MockTransport::failing_with(vec![Ok(DeliveryReport {
            accepted: vec!["b@x.com".to_owned()],
            rejected: vec![("c@y.com".to_owned(), "550 no such user".to_owned())],
        })]);
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(
            table("email,name,password\nb@x.com;c@y.com,Bob,pw2\nd@x.com,Dana,pw3\n"),
            Template::parse(TEMPLATE).unwrap(),
        );

        let summary = merger.run().await.unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.partial, 1);
        assert_eq!(merger.state(), MergeState::Done);
    }

    #[tokio::test]
    async fn test_row_without_recipients_is_skipped() {
        let mock = MockTransport::default();
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(
            table("email,name,password\n ; ,Nobody,pw0\na@x.com,Alice,pw1\n"),
            Template::parse(TEMPLATE).unwrap(),
        );

        let summary = merger.run().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(mock.sent()[0].envelope_recipients(), vec!["a@x.com"]);
    }

    #[tokio::test]
    async fn test_recipient_column_is_not_substituted() {
        let mock = MockTransport::default();
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(
            table("email,name\na@x.com,Alice\n"),
            Template::parse("Hi {name}, this went to {email}").unwrap(),
        );

        merger.run().await.unwrap();
        assert_eq!(mock.sent()[0].body, "Hi Alice, this went to {email}");
    }

    #[tokio::test]
    async fn test_smuggled_address_is_skipped() {
        let mock = MockTransport::default();
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(
            table(
                "email,name,password\n\
                 \"a@x.com\r\nRCPT TO:<evil@z.com>\",Mallory,pw0\n\
                 not an address,Nobody,pw1\n\
                 b@x.com,Bob,pw2\n",
            ),
            Template::parse(TEMPLATE).unwrap(),
        );

        let summary = merger.run().await.unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.sent, 1);

        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_recipients(), vec!["b@x.com"]);
    }

    #[tokio::test]
    async fn test_rows_count_from_one() {
        let mock = MockTransport::failing_with(vec![Err(DeliveryError::ConnectionFailed(
            "reset by peer".to_owned(),
        ))]);
        let mut merger = merger(&mock, MergeOptions::default());
        merger.load(three_rows(), Template::parse(TEMPLATE).unwrap());

        assert_matches!(
            merger.run().await,
            Err(MergeError::Delivery { row: 1, .. })
        );
    }
}
