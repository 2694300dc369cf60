use std::fs;

use chanproxy_peer::{ChannelConfig, Message};
use serde_json::Value;

use crate::cmd::{parse_duration, Endpoint, SendArgs};
use crate::exit::{io_error, proxy_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = Endpoint::parse(&args.path)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let message = resolve_message(&args)?;

    let config = ChannelConfig::default().with_request_timeout(wait_timeout);
    let channel = endpoint.connect(&config).await?;

    if args.wait {
        let reply = channel.send_request(message, None).await;
        channel.dispose_async().await;
        let reply = reply.map_err(|err| proxy_error("request failed", err))?;
        print_message(&reply, &endpoint.to_string(), format);
        return Ok(SUCCESS);
    }

    let sent = channel
        .send(message)
        .map_err(|err| proxy_error("send failed", err))?;
    channel.dispose_async().await;
    if !sent {
        return Err(CliError::new(
            crate::exit::FAILURE,
            "send failed: channel closed before the message was queued",
        ));
    }
    Ok(SUCCESS)
}

fn resolve_message(args: &SendArgs) -> CliResult<Message> {
    if let Some(json) = &args.json {
        let value = serde_json::from_str::<Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(message_from_value(value));
    }
    if let Some(data) = &args.data {
        return Ok(Message::new().with_field("data", data.as_str()));
    }
    if let Some(path) = &args.file {
        let bytes = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        let value = serde_json::from_slice::<Value>(&bytes).map_err(|err| {
            CliError::new(
                DATA_INVALID,
                format!("{} is not valid JSON: {err}", path.display()),
            )
        })?;
        return Ok(message_from_value(value));
    }
    Ok(Message::new())
}

/// Objects become the message itself. Anything else is carried as `data`.
fn message_from_value(value: Value) -> Message {
    match Message::try_from(value) {
        Ok(message) => message,
        Err(other) => Message::new().with_field("data", other),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(json: Option<&str>, data: Option<&str>) -> SendArgs {
        SendArgs {
            path: "/tmp/unused.sock".to_string(),
            json: json.map(str::to_string),
            data: data.map(str::to_string),
            file: None,
            wait: false,
            wait_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn json_object_is_the_message() {
        let message = resolve_message(&args(Some(r#"{"id":"abc","op":"ping"}"#), None)).unwrap();
        assert_eq!(message.id(), Some("abc"));
        assert_eq!(message.get("op"), Some(&json!("ping")));
    }

    #[test]
    fn json_scalar_is_wrapped_in_data() {
        let message = resolve_message(&args(Some("[1,2]"), None)).unwrap();
        assert_eq!(message.get("data"), Some(&json!([1, 2])));
    }

    #[test]
    fn invalid_json_is_usage_error() {
        let err = resolve_message(&args(Some("{nope"), None)).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn raw_data_becomes_data_field() {
        let message = resolve_message(&args(None, Some("hello"))).unwrap();
        assert_eq!(message.get("data"), Some(&json!("hello")));
        assert_eq!(message.id(), None);
    }
}
