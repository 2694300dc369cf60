use chanproxy_peer::{ChannelConfig, ChannelHostProxy, Message, TargetHandle};
use tracing::{info, warn};

use crate::cmd::{shutdown_signal, EchoArgs, Endpoint};
use crate::exit::{proxy_error, CliResult, SUCCESS};

pub async fn run(args: EchoArgs) -> CliResult<i32> {
    let endpoint = Endpoint::parse(&args.path)?;
    let host = ChannelHostProxy::new(ChannelConfig::default());

    host.set_target_acquired_handler(|id, _| info!(target_id = id, "target connected"))
        .map_err(|err| proxy_error("handler setup failed", err))?;
    host.set_target_lost_handler(|id| info!(target_id = id, "target disconnected"))
        .map_err(|err| proxy_error("handler setup failed", err))?;
    host.set_message_handler(echo_message)
        .map_err(|err| proxy_error("handler setup failed", err))?;

    endpoint.serve(&host).await?;
    shutdown_signal().await;

    info!("shutting down");
    host.dispose();
    Ok(SUCCESS)
}

fn echo_message(target: &TargetHandle, message: Message) {
    info!(target_id = target.id(), id = ?message.id(), "echoing message");
    match target.send(message) {
        Ok(true) => {}
        Ok(false) => warn!(target_id = target.id(), "echo dropped; channel closed"),
        Err(err) => warn!(target_id = target.id(), error = %err, "echo send failed"),
    }
}
