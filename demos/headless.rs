use onekey_sync::cookies::JsonCookieStore;
use onekey_sync::events::{Notification, ShowPromptOption, SyncEvent};
use onekey_sync::navigator::InMemoryNavigator;
use onekey_sync::{EngineConfig, Outcome, SyncEngine, SyncError};
use std::sync::Arc;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    env_logger::init();

    // Proxy host of the publisher, e.g. paf.my-website.com
    let proxy_host = std::env::args().nth(1).unwrap_or_else(|| "paf.example.com".to_string());
    let page = std::env::args().nth(2).unwrap_or_else(|| "https://www.example.com/".to_string());

    let config = EngineConfig::builder()
        .proxy_host_name(proxy_host)
        .trigger_redirect_if_needed(true)
        .build()?;

    // Cookies survive between runs, like first-party cookies between page loads
    let cookies = JsonCookieStore::open(std::env::temp_dir().join("onekey-cookies.json"))?;
    let navigator = Arc::new(InMemoryNavigator::new(Url::parse(&page)?));

    let engine = SyncEngine::builder(config)
        .cookie_store(cookies)
        .navigator(navigator.clone())
        .build()?;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SyncEvent::StatusChanged { status } => println!("status: {}", status),
                SyncEvent::Redirecting { url } => println!("redirecting to {}", url),
                SyncEvent::NotificationFired { notification } => println!("notification: {}", notification),
            }
        }
    });

    // A headless host has nobody to ask: the prompt is always dismissed
    engine.set_prompt_handler(|| async { None }).await;
    engine
        .set_notification_handler(|n: Notification| async move { log::info!("Would show {}", n) })
        .await;

    // Commands pushed before start() run once the engine is ready
    engine.queue().push(|| {
        log::info!("Engine ready");
        Ok(())
    });

    if let Some(resumed) = engine.start().await? {
        println!("resumed after redirect: {:?}", resumed);
    }

    match engine.refresh_ids_and_preferences(ShowPromptOption::PromptIfUnknownUser).await {
        Ok(Outcome::Completed(result)) => {
            println!("{}: {:?}", result.status, result.data);
        }
        Ok(Outcome::Redirected { url }) => {
            println!("open {} in a browser to continue", url);
        }
        Err(e) if e.is_network() => {
            eprintln!("proxy unreachable, try again later: {}", e);
        }
        Err(e) => return Err(e),
    }

    Ok(())
}
