use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt::Display;

use crate::config::SmtpConfig;
use crate::error::{AppError, Result};
use crate::stories::DataStory;

/// Sends notices through any lettre transport; SMTP in production.
pub struct Mailer<T = AsyncSmtpTransport<Tokio1Executor>> {
    transport: T,
    from: Mailbox,
}

impl Mailer {
    pub fn new(config: &SmtpConfig, sender_address: &str) -> Result<Self> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let smtp = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.relay)
            .map_err(|e| AppError::Mail(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .build();

        Mailer::with_transport(smtp, sender_address)
    }
}

impl<T> Mailer<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: Display,
{
    pub fn with_transport(transport: T, sender_address: &str) -> Result<Self> {
        let from = sender_address
            .parse()
            .map_err(|e: lettre::address::AddressError| AppError::Mail(e.to_string()))?;
        Ok(Mailer { transport, from })
    }

    /// Tell the owner and contributors their story is live.
    ///
    /// Every recipient is tried. Bad addresses and failed sends are logged and
    /// skipped. Returns how many notices went out.
    pub async fn send_datastory_published(&self, story: &DataStory, story_url: &str) -> Result<usize> {
        let mut sent = 0;
        for recipient in story.recipients() {
            let to: Mailbox = match recipient.parse() {
                Ok(to) => to,
                Err(e) => {
                    log::warn!("skipping recipient {}: {}", recipient, e);
                    continue;
                }
            };

            let email = Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(format!("Data story published: {}", story.name))
                .body(published_body(story, story_url))
                .map_err(|e| AppError::Mail(e.to_string()))?;

            match self.transport.send(email).await {
                Ok(_) => {
                    sent += 1;
                    log::info!("sent publish notice for {} to {}", story_url, recipient);
                }
                Err(e) => log::error!("publish notice to {} failed: {}", recipient, e),
            }
        }
        Ok(sent)
    }
}

pub fn published_body(story: &DataStory, story_url: &str) -> String {
    format!(
        "The data story for project \"{}\" has been published.\n\nRead it at {}\n\nThank you for contributing.",
        story.name, story_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stories::{Person, ProjectRecord};
    use lettre::transport::stub::AsyncStubTransport;
    use std::collections::BTreeMap;

    fn story() -> DataStory {
        let mut senders = BTreeMap::new();
        senders.insert(
            "s1".to_string(),
            Person {
                name: "Bo".into(),
                email: "bo@example.org".into(),
            },
        );
        senders.insert(
            "s2".to_string(),
            Person {
                name: "Cy".into(),
                email: "not an address".into(),
            },
        );
        senders.insert(
            "s3".to_string(),
            Person {
                name: "Di".into(),
                email: "di@example.org".into(),
            },
        );
        DataStory::draft_of(&ProjectRecord {
            id: "p1".into(),
            name: "Reef survey".into(),
            license: None,
            organization: "Reef Watch".into(),
            owner: Person {
                name: "Ana".into(),
                email: "ana@example.org".into(),
            },
            senders,
            files: Vec::new(),
        })
    }

    #[test]
    fn body_names_project_and_link() {
        let body = published_body(&story(), "http://x/datastories/abc-def-ghi");
        assert!(body.contains("\"Reef survey\""));
        assert!(body.contains("Read it at http://x/datastories/abc-def-ghi"));
    }

    #[tokio::test]
    async fn notifies_owner_and_valid_senders() {
        let mailer = Mailer::with_transport(AsyncStubTransport::new_ok(), "noreply@example.org").unwrap();
        let sent = mailer.send_datastory_published(&story(), "http://x/s").await.unwrap();
        assert_eq!(sent, 3);
        assert_eq!(mailer.transport.messages().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_send_does_not_stop_the_rest() {
        let mailer = Mailer::with_transport(AsyncStubTransport::new_error(), "noreply@example.org").unwrap();
        let sent = mailer.send_datastory_published(&story(), "http://x/s").await.unwrap();
        assert_eq!(sent, 0);
        assert_eq!(mailer.transport.messages().await.len(), 3);
    }

    #[test]
    fn bad_sender_address_is_rejected() {
        assert!(matches!(
            Mailer::with_transport(AsyncStubTransport::new_ok(), "nope"),
            Err(AppError::Mail(_))
        ));
    }
}
