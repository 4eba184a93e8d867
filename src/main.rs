//! reportek-channels listener entry point.
//!
//! Connects to one envelope channel and logs every notification until
//! Ctrl-C or until the stream ends.

use tracing_subscriber::EnvFilter;

use reportek_channels::config::ChannelConfig;
use reportek_channels::observer::{Delivery, channel_observer};
use reportek_channels::{Channels, DomainEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ChannelConfig::from_env()?;

    // Initialize tracing
    init_tracing(&config);
    tracing::info!(
        origin = %config.origin,
        address = %config.address,
        reconnect_ms = u64::try_from(config.options.reconnect_interval.as_millis()).unwrap_or(u64::MAX),
        "starting reportek-channels"
    );

    // Install the channel and attach a logging observer
    let channels = Channels::new(config.origin.clone(), config.options.clone());
    channels.listen(config.address.clone())?;
    let (observer, mut deliveries) = channel_observer();
    channels.subscribe(observer, "envelope")?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                tracing::info!("interrupted; shutting down");
                break;
            }
            delivery = deliveries.recv() => match delivery {
                Some(Delivery::Event(event)) => log_event(&event),
                Some(Delivery::Error(reason)) => {
                    tracing::error!(%reason, "channel stream failed");
                    break;
                }
                Some(Delivery::Complete) | None => {
                    tracing::info!("channel stream completed");
                    break;
                }
            }
        }
    }

    channels.reset();
    Ok(())
}

fn init_tracing(config: &ChannelConfig) {
    let default_level = if config.options.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_event(event: &DomainEvent) {
    match event.notification() {
        Some(note) => tracing::info!(
            event = ?note.event,
            data = %note.data,
            received_at = %event.received_at(),
            "notification"
        ),
        None => tracing::info!(
            payload = %event.payload(),
            received_at = %event.received_at(),
            "event"
        ),
    }
}
