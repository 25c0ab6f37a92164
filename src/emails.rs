use lettre::smtp::authentication::Credentials;
use lettre::{SmtpClient, Transport};
use lettre_email::EmailBuilder;
use std::error::Error;
use std::thread;

use config::{self, MailConfig};
use users::models::User;

/// Hands the message to a background thread and returns immediately: the HTTP
/// response must never wait on SMTP. Delivery failures are logged, not
/// surfaced. Without a configured MAIL_SERVER the message is dropped.
pub fn send_email(
    subject: &str,
    sender: &str,
    recipients: &[String],
    text_body: String,
    html_body: String,
) {
    let mail_config = match MailConfig::from_env() {
        Some(mail_config) => mail_config,
        None => {
            info!("mail is not configured, dropping {:?}", subject);
            return;
        }
    };
    let subject = subject.to_string();
    let sender = sender.to_string();
    let recipients = recipients.to_vec();
    thread::spawn(move || {
        match deliver(&mail_config, &subject, &sender, &recipients, &text_body, &html_body) {
            Ok(()) => debug!("sent {:?} to {:?}", subject, recipients),
            Err(e) => warn!("failed to send {:?}: {}", subject, e),
        }
    });
}

fn deliver(
    mail_config: &MailConfig,
    subject: &str,
    sender: &str,
    recipients: &[String],
    text_body: &str,
    html_body: &str,
) -> Result<(), Box<Error>> {
    let mut builder = EmailBuilder::new().from(sender).subject(subject);
    for recipient in recipients {
        builder = builder.to(recipient.as_str());
    }
    let email = builder.alternative(html_body, text_body).build()?;

    let client = SmtpClient::new_simple(&mail_config.server)?;
    let client = if mail_config.username.is_empty() {
        client
    } else {
        client.credentials(Credentials::new(
            mail_config.username.clone(),
            mail_config.password.clone(),
        ))
    };
    let mut transport = client.transport();
    transport.send(email.into())?;
    Ok(())
}

pub fn compose_follower_email(followed: &User, follower: &User) -> (String, String, String) {
    let subject = format!("[microblog] {} is now following you!", follower.name);
    let text_body = format!(
        "Dear {},\n\n{} is now a follower of yours. Their posts will keep \
         coming whether you follow back or not.\n\n-- the microblog team",
        followed.name, follower.name
    );
    let html_body = format!(
        "<p>Dear {},</p>\
         <p><a href=\"/users/{}\">{}</a> is now a follower of yours.</p>\
         <p>-- the microblog team</p>",
        followed.name, follower.name, follower.name
    );
    (subject, text_body, html_body)
}

/// Tells `followed` that `follower` started following them.
pub fn follower_notification(followed: &User, follower: &User) {
    let (subject, text_body, html_body) = compose_follower_email(followed, follower);
    send_email(
        &subject,
        &config::mail_sender(),
        &[followed.email.clone()],
        text_body,
        html_body,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use users::models::User;

    fn user(name: &str, email: &str) -> User {
        User {
            id: 1,
            name: name.to_string(),
            email: email.to_string(),
            password: "x".to_string(),
            role: 0,
            status: 0,
            about_me: None,
            last_seen: Some(Utc::now().naive_utc()),
        }
    }

    #[test]
    fn follower_email_names_both_parties() {
        let followed = user("susan", "susan@example.com");
        let follower = user("john", "john@example.com");
        let (subject, text_body, html_body) = compose_follower_email(&followed, &follower);
        assert_eq!(subject, "[microblog] john is now following you!");
        assert!(text_body.starts_with("Dear susan,"));
        assert!(text_body.contains("john is now a follower"));
        assert!(html_body.contains("<a href=\"/users/john\">john</a>"));
    }
}
