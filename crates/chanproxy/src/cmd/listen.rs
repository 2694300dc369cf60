use chanproxy_peer::{ChannelConfig, ChannelHostProxy, Message};
use tokio::sync::mpsc;
use tracing::info;

use crate::cmd::{shutdown_signal, Endpoint, ListenArgs};
use crate::exit::{proxy_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = Endpoint::parse(&args.path)?;
    let host = ChannelHostProxy::new(ChannelConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Message)>();
    host.set_target_acquired_handler(|id, _| info!(target_id = id, "target connected"))
        .map_err(|err| proxy_error("handler setup failed", err))?;
    host.set_target_lost_handler(|id| info!(target_id = id, "target disconnected"))
        .map_err(|err| proxy_error("handler setup failed", err))?;
    host.set_message_handler(move |target, message| {
        let _ = tx.send((target.id().to_string(), message));
    })
    .map_err(|err| proxy_error("handler setup failed", err))?;

    endpoint.serve(&host).await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = rx.recv() => {
                let Some((target_id, message)) = received else {
                    break;
                };
                print_message(&message, &target_id, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    host.dispose();
    Ok(SUCCESS)
}
