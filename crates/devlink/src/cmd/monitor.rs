use devlink_engine::{EngineConfig, TopicDispatcher};
use devlink_frame::JsonCodec;
use serde_json::Value;

use crate::cmd::MonitorArgs;
use crate::exit::{engine_error, CliError, CliResult, INTERNAL};
use crate::output::{emit, OutputFormat, Record};

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .map_err(|err| engine_error(&format!("failed loading {}", path.display()), err))?,
        None => EngineConfig::default(),
    };
    config.decoder = args.framing.apply(config.decoder)?;
    if let Some(field) = &args.topic_field {
        config.topic_field = field.clone();
    }
    if args.no_reconnect {
        config.auto_reconnect = false;
    }
    config
        .validate()
        .map_err(|err| engine_error("invalid configuration", err))?;

    let dispatcher = printing_dispatcher(&config, format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed starting runtime: {err}")))?;
    runtime.block_on(watch(args, config, dispatcher, format))
}

/// Every message, line and SLIP frame becomes an output record.
fn printing_dispatcher(config: &EngineConfig, format: OutputFormat) -> TopicDispatcher<Value> {
    let topic_field = config.topic_field.clone();
    config
        .dispatcher::<Value>()
        .fallback(move |message, ctx| {
            emit(&Record::message(Some(ctx.uuid()), message, &topic_field), format);
            Ok(())
        })
        .on_text(move |line, ctx| {
            emit(
                &Record::Text {
                    uuid: Some(ctx.uuid()),
                    line,
                },
                format,
            );
            Ok(())
        })
        .on_binary(move |frame, ctx| {
            emit(&Record::frame(Some(ctx.uuid()), frame), format);
            Ok(())
        })
        .build()
}

#[cfg(unix)]
async fn watch(
    args: MonitorArgs,
    config: EngineConfig,
    dispatcher: TopicDispatcher<Value>,
    format: OutputFormat,
) -> CliResult<i32> {
    use std::sync::Arc;

    use devlink_engine::{ConnectionOptions, Engine, Health};
    use devlink_transport::{event_channel, UnixSocketTransport, DEFAULT_EVENT_CAPACITY};
    use tokio::sync::broadcast::error::RecvError;
    use tracing::{info, warn};

    use crate::exit::{transport_error, SUCCESS, TRANSPORT_ERROR};

    let engine = Engine::new(config, JsonCodec, dispatcher)
        .map_err(|err| engine_error("invalid configuration", err))?;

    let mut lifecycle = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match lifecycle.recv().await {
                Ok(event) => emit(&Record::connection(&event), format),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "connection events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (events_tx, events_rx) = event_channel(DEFAULT_EVENT_CAPACITY);
    let transport = UnixSocketTransport::new(&args.socket, events_tx)
        .map_err(|err| transport_error("invalid socket", err))?;
    let label = args.socket.display().to_string();
    let uuid = engine
        .attach(
            Arc::new(transport),
            events_rx,
            ConnectionOptions::new().label(label.clone()),
        )
        .await
        .map_err(|err| engine_error("attach failed", err))?;

    if engine.health(&uuid) == Some(Health::Disconnected) && !engine.config().auto_reconnect {
        let reason = engine
            .logs(&uuid)
            .and_then(|logs| logs.last().map(|entry| entry.message.clone()))
            .unwrap_or_else(|| "link did not open".to_string());
        engine.shutdown().await;
        printer.abort();
        return Err(CliError::new(
            TRANSPORT_ERROR,
            format!("connect to {label} failed: {reason}"),
        ));
    }

    info!(uuid = %uuid, socket = %label, "monitoring; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    info!("shutting down");
    engine.shutdown().await;
    printer.abort();
    Ok(SUCCESS)
}

#[cfg(not(unix))]
async fn watch(
    _args: MonitorArgs,
    _config: EngineConfig,
    _dispatcher: TopicDispatcher<Value>,
    _format: OutputFormat,
) -> CliResult<i32> {
    Err(CliError::new(
        crate::exit::FAILURE,
        "monitor requires Unix domain sockets",
    ))
}
