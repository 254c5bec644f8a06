//! Relay Station - relays a task between live chat surfaces

use relay_station::config::{BrowserSettings, RelayConfig};
use relay_station::probe::SurfaceBrowser;
use relay_station::runtime::{RelayLoop, RunOutcome};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json = std::env::var("RELAY_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_station=info,chromiumoxide=warn".into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
        }))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    let config = RelayConfig::from_env()?;
    let roles = config.topology.roles();
    let settings = BrowserSettings::from_env(&roles);

    tracing::info!(
        topology = config.topology.as_str(),
        start_mode = config.start_mode.as_str(),
        seed = config.initial_seed,
        "Launching browser"
    );
    let browser = SurfaceBrowser::launch(&settings, &roles).await?;
    let participants = browser.participants(&settings, &config.timeouts);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping at the next checkpoint");
            on_signal.cancel();
        }
    });

    let mut relay = match RelayLoop::new(config, participants, cancel.clone()) {
        Ok(relay) => relay,
        Err(e) => {
            browser.close().await;
            return Err(e.into());
        }
    };

    let mut events = relay.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(line) => tracing::debug!(target: "relay_station::events", "{line}"),
                    Err(e) => tracing::warn!(error = %e, "Unserializable relay event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = relay.run().await;
    drop(relay);
    let _ = event_log.await;

    match outcome {
        Ok(RunOutcome::Terminated { final_message }) => {
            println!("{}", final_message.text);
            tracing::info!("Surfaces left open for inspection; press Ctrl-C to exit");
            cancel.cancelled().await;
        }
        Ok(RunOutcome::StoppedByRequest) => {}
        Err(e) => {
            browser.close().await;
            return Err(e.into());
        }
    }
    browser.close().await;
    Ok(())
}
