//! Email delivery against a scripted SMTP server on a local socket.

use alertgate::{
    channels::EmailChannel,
    config::EmailConfig,
    core::{Alert, Channel, Severity},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

#[derive(Clone, Copy, Default)]
struct Script {
    reject_auth: bool,
    reject_recipient: Option<&'static str>,
}

/// Accepts one connection and answers it according to `script`. Returns the
/// lines received, with the DATA payload collected as a single entry.
async fn spawn_server(script: Script) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut transcript = Vec::new();

        let _ = write.write_all(b"220 mock.example.com ESMTP ready\r\n").await;
        while let Ok(Some(line)) = lines.next_line().await {
            transcript.push(line.clone());
            let upper = line.to_ascii_uppercase();
            let reply: &[u8] = if upper.starts_with("EHLO") {
                b"250-mock.example.com\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n"
            } else if upper.starts_with("AUTH") {
                if script.reject_auth {
                    b"535 5.7.8 Authentication credentials invalid\r\n"
                } else {
                    b"235 2.7.0 Authentication successful\r\n"
                }
            } else if upper.starts_with("MAIL FROM") {
                b"250 2.1.0 OK\r\n"
            } else if upper.starts_with("RCPT TO") {
                match script.reject_recipient {
                    Some(address) if line.contains(address) => b"550 5.1.1 No such user\r\n",
                    _ => b"250 2.1.5 OK\r\n",
                }
            } else if upper == "DATA" {
                let _ = write.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await;
                let mut payload = Vec::new();
                while let Ok(Some(data_line)) = lines.next_line().await {
                    if data_line == "." {
                        break;
                    }
                    payload.push(data_line);
                }
                transcript.push(payload.join("\n"));
                b"250 2.0.0 Queued\r\n"
            } else if upper == "QUIT" {
                let _ = write.write_all(b"221 2.0.0 Bye\r\n").await;
                break;
            } else {
                b"502 5.5.2 Command not recognized\r\n"
            };
            let _ = write.write_all(reply).await;
        }
        transcript
    });

    (port, handle)
}

fn config(port: u16) -> EmailConfig {
    EmailConfig {
        smtp_host: "127.0.0.1".to_string(),
        smtp_port: port,
        username: "alerts".to_string(),
        password: "hunter2".to_string(),
        from: "alerts@example.com".to_string(),
        to: vec!["ops@example.com".to_string(), "dba@example.com".to_string()],
        use_tls: false,
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn alert() -> Alert {
    Alert::new("E42", "Backup failed\n.hidden line")
        .with_command("backup")
        .with_severity(Severity::Critical)
        .with_trace_id("trace-1")
}

#[tokio::test]
#[traced_test]
async fn test_delivers_over_plain_smtp() {
    let (port, server) = spawn_server(Script::default()).await;
    let channel = EmailChannel::from_config(config(port)).unwrap();

    channel.send(&CancellationToken::new(), &alert()).await.unwrap();
    let transcript = server.await.unwrap();

    assert!(transcript[0].starts_with("EHLO "));
    let token = BASE64.encode("\0alerts\0hunter2");
    assert_eq!(transcript[1], format!("AUTH PLAIN {token}"));
    assert!(transcript[2].starts_with("MAIL FROM:<alerts@example.com>"));
    assert_eq!(transcript[3], "RCPT TO:<ops@example.com>");
    assert_eq!(transcript[4], "RCPT TO:<dba@example.com>");
    assert_eq!(transcript[5], "DATA");
    assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));

    let message = &transcript[6];
    assert!(message.contains("Subject: [alertgate] E42: backup"));
    assert!(message.contains("To: ops@example.com, dba@example.com"));
    assert!(message.contains("Content-Type: text/plain; charset=utf-8"));
    assert!(message.contains("Content-Transfer-Encoding: 8bit"));
    // Lines starting with a dot are stuffed on the wire.
    assert!(message.contains("\n..hidden line"));

    assert!(logs_contain("Email alert sent"));
}

#[tokio::test]
#[traced_test]
async fn test_credentials_are_never_sent_without_starttls() {
    let (port, server) = spawn_server(Script::default()).await;
    let channel = EmailChannel::from_config(EmailConfig {
        use_tls: true,
        ..config(port)
    })
    .unwrap();

    assert!(channel.send(&CancellationToken::new(), &alert()).await.is_ok());
    let transcript = server.await.unwrap();

    assert!(transcript[0].starts_with("EHLO "));
    assert!(!transcript.iter().any(|line| line.starts_with("AUTH")));
    assert!(!transcript.iter().any(|line| line.starts_with("MAIL")));
    assert!(logs_contain("Failed to send email alert"));
    assert!(!logs_contain("hunter2"));
}

#[tokio::test]
#[traced_test]
async fn test_anonymous_relay_without_starttls_still_delivers() {
    let (port, server) = spawn_server(Script::default()).await;
    let channel = EmailChannel::from_config(EmailConfig {
        use_tls: true,
        username: String::new(),
        password: String::new(),
        ..config(port)
    })
    .unwrap();

    channel.send(&CancellationToken::new(), &alert()).await.unwrap();
    let transcript = server.await.unwrap();

    assert!(!transcript.iter().any(|line| line.starts_with("AUTH")));
    assert!(transcript.contains(&"DATA".to_string()));
    assert!(logs_contain("Email alert sent"));
}

#[tokio::test]
#[traced_test]
async fn test_auth_failure_is_logged_without_credentials() {
    let script = Script {
        reject_auth: true,
        ..Default::default()
    };
    let (port, server) = spawn_server(script).await;
    let channel = EmailChannel::from_config(config(port)).unwrap();

    assert!(channel.send(&CancellationToken::new(), &alert()).await.is_ok());
    let transcript = server.await.unwrap();

    assert!(!transcript.iter().any(|line| line.starts_with("MAIL")));
    assert!(logs_contain("SMTP authentication failed"));
    assert!(!logs_contain("hunter2"));
    assert!(!logs_contain(&BASE64.encode("\0alerts\0hunter2")));
}

#[tokio::test]
#[traced_test]
async fn test_rejected_recipient_aborts_delivery() {
    let script = Script {
        reject_recipient: Some("dba@example.com"),
        ..Default::default()
    };
    let (port, server) = spawn_server(script).await;
    let channel = EmailChannel::from_config(config(port)).unwrap();

    assert!(channel.send(&CancellationToken::new(), &alert()).await.is_ok());
    let transcript = server.await.unwrap();

    assert!(transcript.contains(&"RCPT TO:<dba@example.com>".to_string()));
    assert!(!transcript.contains(&"DATA".to_string()));
    assert!(logs_contain("Failed to send email alert"));
    assert!(logs_contain("550"));
}

#[tokio::test]
#[traced_test]
async fn test_unreachable_server_is_swallowed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let channel = EmailChannel::from_config(config(port)).unwrap();
    assert!(channel.send(&CancellationToken::new(), &alert()).await.is_ok());
    assert!(logs_contain("Failed to send email alert"));
}
