/// Email templates for the email-eligible notification types
use crate::models::{Notification, NotificationType};

/// Values shared by every template
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub base_url: String,
    pub product_name: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            product_name: "Task Manager".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

/// Render the email for `notification`. `None` for types that never email.
pub fn render(notification: &Notification, settings: &EmailSettings) -> Option<RenderedEmail> {
    let heading = match notification.notification_type {
        NotificationType::Assignment => "You have a new task",
        NotificationType::StatusChange => "A task was updated",
        NotificationType::Reminder => "Task reminder",
        NotificationType::Overdue => "A task is overdue",
        _ => return None,
    };

    let subject = format!("[{}] {}", settings.product_name, notification.title);
    let link = entity_link(notification, settings);

    let button = link
        .map(|href| {
            format!(
                r#"<p style="margin: 30px 0;">
        <a href="{href}" style="background-color: #000; color: #fff; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">Open task</a>
    </p>"#,
                href = escape_html(&href)
            )
        })
        .unwrap_or_default();

    let html_body = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 20px; color: #333;">
    <h2>{heading}</h2>
    <h3>{title}</h3>
    <p>{message}</p>
    {button}
    <p style="color: #999; font-size: 12px; margin-top: 30px;">
        You received this email because of your notification settings in {product}.
    </p>
</body>
</html>"#,
        heading = heading,
        title = escape_html(&notification.title),
        message = escape_html(&notification.message),
        button = button,
        product = escape_html(&settings.product_name),
    );

    Some(RenderedEmail { subject, html_body })
}

fn entity_link(notification: &Notification, settings: &EmailSettings) -> Option<String> {
    let id = notification.related_entity_id?;
    match notification.related_entity_type.as_deref() {
        Some("Task") => Some(format!(
            "{}/tasks/{}",
            settings.base_url.trim_end_matches('/'),
            id
        )),
        _ => None,
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Plain-text fallback: strip tags, decode the entities `escape_html` emits
/// and collapse blank lines.
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateNotification;
    use chrono::Utc;
    use uuid::Uuid;

    fn notification(kind: NotificationType) -> Notification {
        CreateNotification::new(Uuid::new_v4(), "Ship <v2>", "Due & ready", kind)
            .into_notification(Utc::now())
    }

    #[test]
    fn test_only_eligible_types_render() {
        let settings = EmailSettings::default();
        assert!(render(&notification(NotificationType::Assignment), &settings).is_some());
        assert!(render(&notification(NotificationType::Overdue), &settings).is_some());
        assert!(render(&notification(NotificationType::Comment), &settings).is_none());
        assert!(render(&notification(NotificationType::System), &settings).is_none());
    }

    #[test]
    fn test_user_text_is_escaped() {
        let email = render(
            &notification(NotificationType::Reminder),
            &EmailSettings::default(),
        )
        .unwrap();
        assert!(email.html_body.contains("Ship &lt;v2&gt;"));
        assert!(email.html_body.contains("Due &amp; ready"));
        assert!(!email.html_body.contains("<v2>"));
        assert_eq!(email.subject, "[Task Manager] Ship <v2>");
    }

    #[test]
    fn test_task_link() {
        let task_id = Uuid::new_v4();
        let n = CreateNotification::new(Uuid::new_v4(), "Ship", "Now", NotificationType::Assignment)
            .related_to(task_id, "Task")
            .into_notification(Utc::now());
        let settings = EmailSettings {
            base_url: "https://tasks.example.com/".to_string(),
            product_name: "Tasks".to_string(),
        };
        let email = render(&n, &settings).unwrap();
        assert!(email
            .html_body
            .contains(&format!("https://tasks.example.com/tasks/{}", task_id)));
    }

    #[test]
    fn test_html_to_text() {
        let text = html_to_text("<h2>Hello</h2>\n<p>A &amp; B</p>");
        assert_eq!(text, "Hello\nA & B");
    }
}
