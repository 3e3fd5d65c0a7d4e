use events::{EventFrame, ResourceId};
use log::{error, info, warn};
use service::{config::Config, logging::Logger, AppState};
use sse::StatusPublisher;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        std::process::exit(1);
    }

    info!("Starting feed_stream in {} mode", config.runtime_env());

    if config.post_ids.is_empty() {
        error!("No post ids given; pass --post-ids or set POST_IDS");
        std::process::exit(1);
    }

    let transport = match service::init_transport(&config) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to set up the event stream transport: {e}");
            std::process::exit(1);
        }
    };

    let app_state = AppState::new(config.clone(), transport);

    let mut subscriptions = Vec::with_capacity(config.post_ids.len());
    for post_id in &config.post_ids {
        let post = ResourceId::new(post_id.as_str());
        let label = post.clone();
        subscriptions.push(app_state.broadcaster().subscribe(
            post.clone(),
            move |frame: &EventFrame| {
                info!("[{}] {}: {}", label, frame.kind, frame.payload);
                Ok(())
            },
        ));

        if let Some(publisher) = app_state.broadcaster().publisher(&post) {
            tokio::spawn(report_status(publisher));
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down");
    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    app_state.shutdown();
}

/// Log every connection status change of one post until its stream is closed.
async fn report_status(mut publisher: StatusPublisher) {
    while let Some(status) = publisher.changed().await {
        info!("[{}] {}", publisher.resource_id(), status);
    }
}
