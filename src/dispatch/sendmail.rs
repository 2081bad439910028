use crate::config::SendmailConfig;
use crate::dispatch::{AlertDispatcher, DispatchError};
use crate::notify::NotificationPayload;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use teloxide::utils::html::escape;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Hands an HTML e-mail to the local MTA via `sendmail -oi -t`.
pub struct SendmailDispatcher {
    program: PathBuf,
    from: String,
    to: String,
}

impl SendmailDispatcher {
    pub fn new(cfg: &SendmailConfig) -> Self {
        Self {
            program: cfg.path.clone(),
            from: cfg.source_email_address.clone(),
            to: cfg.target_email_address.clone(),
        }
    }
}

#[async_trait]
impl AlertDispatcher for SendmailDispatcher {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    async fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        let program = self.program.display().to_string();
        let message = render_message(&self.from, &self.to, payload);

        let mut child = Command::new(&self.program)
            .args(["-oi", "-t"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                program: program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.as_bytes())
                .await
                .map_err(|source| DispatchError::Io {
                    program: program.clone(),
                    source,
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| DispatchError::Io {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(DispatchError::Status {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(to = %self.to, bytes = message.len(), "message handed to sendmail");
        Ok(())
    }
}

/// Full RFC 5322 message: headers, blank line, HTML body.
pub fn render_message(from: &str, to: &str, payload: &NotificationPayload) -> String {
    let mut out = String::new();
    let _ = write!(out, "From: {}\r\n", header_value(from));
    let _ = write!(out, "To: {}\r\n", header_value(to));
    let _ = write!(out, "Subject: {}\r\n", header_value(&payload.subject));
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str("Content-Type: text/html; charset=UTF-8\r\n");
    out.push_str("Content-Transfer-Encoding: 8bit\r\n");
    out.push_str("\r\n");
    out.push_str(&render_html(payload));
    out
}

pub fn render_html(payload: &NotificationPayload) -> String {
    let field = |name: &str| escape(payload.field(name).unwrap_or("n/a"));
    let subject = escape(&payload.subject);

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"UTF-8\">\n");
    let _ = writeln!(html, "<title>{subject}</title>");
    html.push_str("</head>\n<body>\n");
    let _ = writeln!(
        html,
        "<h4>Alert for <b>{}</b> <i>[{}]</i></h4>",
        field("Server name"),
        field("Host name")
    );

    if !payload.alerts.is_empty() {
        html.push_str("<ul>\n");
        for line in &payload.alerts {
            let _ = writeln!(html, "<li><b>{}</b></li>", escape(line));
        }
        html.push_str("</ul>\n");
    }

    html.push_str("<ul>\n");
    for f in &payload.fields {
        if f.name == "Version" {
            continue;
        }
        let _ = writeln!(html, "<li>{}: {}</li>", escape(f.name), escape(&f.value));
    }
    html.push_str("</ul>\n");

    if !payload.unavailable.is_empty() {
        let names: Vec<&str> = payload.unavailable.iter().map(|k| k.as_str()).collect();
        let _ = writeln!(html, "<p>Not collected this run: {}</p>", names.join(", "));
    }

    let _ = writeln!(html, "<br />\n<p>hostmon version \"{}\"</p>", field("Version"));
    html.push_str("</body>\n</html>\n");
    html
}

/// Header values must stay on one line.
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}
