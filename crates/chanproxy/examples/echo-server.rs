//! Minimal echo host: replies to every request with the request itself.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send /tmp/chanproxy-echo-<pid>/echo.sock \
//!     --json '{"hello":"world"}' --wait --wait-timeout 3s

use std::fs;

use chanproxy::peer::{ChannelConfig, ChannelHostProxy};
use chanproxy::transport::UnixDomainSocket;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("chanproxy-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");

    let host = ChannelHostProxy::new(ChannelConfig::default());
    host.set_target_acquired_handler(|id, _| eprintln!("Target connected: {id}"))?;
    host.set_target_lost_handler(|id| eprintln!("Target disconnected: {id}"))?;
    host.set_message_handler(|target, message| {
        eprintln!("Echoing {:?} for {}", message.id(), target.id());
        if let Err(e) = target.send(message) {
            eprintln!("Echo failed: {e}");
        }
    })?;

    host.listen(UnixDomainSocket::bind(&sock_path)?)?;
    eprintln!("Listening on {}", sock_path.display());

    tokio::signal::ctrl_c().await?;
    host.dispose();

    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
