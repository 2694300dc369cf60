//! One-call constructors for a ready [`RequestChannel`].

#[cfg(unix)]
use std::path::Path;

#[cfg(unix)]
use chanproxy_transport::UnixDomainSocket;
use chanproxy_transport::{ProcessChannel, TcpSocketListener};
use tokio::net::ToSocketAddrs;
use tokio::process::Child;

use crate::config::ChannelConfig;
use crate::error::Result;
use crate::proxy::ChannelProxy;
use crate::request::RequestChannel;

/// Connect to a channel host listening on a Unix domain socket.
#[cfg(unix)]
pub async fn connect_unix(path: impl AsRef<Path>, config: &ChannelConfig) -> Result<RequestChannel> {
    let stream = UnixDomainSocket::connect(path).await?;
    RequestChannel::new(ChannelProxy::socket(stream, config)?, config)
}

/// Connect to a channel host listening on TCP.
pub async fn connect_tcp(
    addr: impl ToSocketAddrs + std::fmt::Debug,
    config: &ChannelConfig,
) -> Result<RequestChannel> {
    let stream = TcpSocketListener::connect(addr).await?;
    RequestChannel::new(ChannelProxy::socket(stream, config)?, config)
}

/// Talk to a spawned child over its piped stdin and stdout.
pub fn attach_child(child: &mut Child, config: &ChannelConfig) -> Result<RequestChannel> {
    let channel = ProcessChannel::from_child(child)?;
    RequestChannel::new(ChannelProxy::process(channel, config)?, config)
}

/// Talk to the parent process over this process's stdin and stdout.
pub fn attach_stdio(config: &ChannelConfig) -> Result<RequestChannel> {
    RequestChannel::new(
        ChannelProxy::process(ProcessChannel::from_stdio(), config)?,
        config,
    )
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::Stdio;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::error::ProxyError;
    use crate::host::ChannelHostProxy;
    use crate::message::Message;

    #[tokio::test]
    async fn connect_unix_round_trip_through_host() {
        let dir = std::env::temp_dir().join(format!(
            "chanproxy-conn-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let sock_path = dir.join("host.sock");

        let host = ChannelHostProxy::new(ChannelConfig::default());
        host.set_message_handler(|target, message| {
            let reply = message.reply().with_field("from", target.id().to_string());
            target.send(reply).expect("reply should queue");
        })
        .expect("handler should install");
        host.listen(UnixDomainSocket::bind(&sock_path).expect("listener should bind"))
            .expect("host should listen");

        let client = connect_unix(&sock_path, &ChannelConfig::default())
            .await
            .expect("client should connect");
        let reply = client
            .send_request(Message::new(), Some(Duration::from_secs(5)))
            .await
            .expect("request should succeed");
        let from = reply.get("from").and_then(|v| v.as_str()).expect("host tagged reply");
        assert_eq!(host.target_names(), vec![from.to_string()]);

        host.dispose();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn connect_tcp_refused() {
        let addr = {
            let listener = TcpSocketListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr()
        };
        let result = connect_tcp(addr, &ChannelConfig::default()).await;
        assert!(matches!(result, Err(ProxyError::Transport(_))));
    }

    #[tokio::test]
    async fn attach_child_echo_process() {
        // `cat` echoes each line, so a request comes back as its own reply.
        let mut child = tokio::process::Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("cat should spawn");
        let channel = attach_child(&mut child, &ChannelConfig::default()).expect("attach");

        let reply = channel
            .send_request(
                Message::new().with_field("ping", json!([1, 2])),
                Some(Duration::from_secs(5)),
            )
            .await
            .expect("echoed reply");
        assert_eq!(reply.get("ping"), Some(&json!([1, 2])));

        channel.dispose_async().await;
        let status = child.wait().await.expect("cat should exit");
        assert!(status.success());
    }

    #[tokio::test]
    async fn attach_child_requires_pipes() {
        let mut child = tokio::process::Command::new("true")
            .spawn()
            .expect("true should spawn");
        let result = attach_child(&mut child, &ChannelConfig::default());
        assert!(matches!(result, Err(ProxyError::Transport(_))));
        let _ = child.wait().await;
    }
}
