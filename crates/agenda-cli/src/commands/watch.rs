use std::sync::Arc;

use agenda_core::client::Session;
use agenda_core::sync::ConnectivityState;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::commands::common::{format_notice, load_client_config, Context};
use crate::error::CliError;
use crate::realtime::spawn_listener;

pub async fn run_watch(context: &Context) -> Result<(), CliError> {
    let config = load_client_config(context)?;
    let session = Arc::new(Session::open(&config, &context.db_path).await?);
    let mut notices = session.subscribe();
    let tasks = session.start();

    if session.check_connectivity().await == ConnectivityState::Online {
        println!("{}", session.synchronize().await.summary());
    } else {
        println!("Offline; waiting for the server");
    }

    let cancel = CancellationToken::new();
    let listener = spawn_listener(Arc::clone(&session), &config, cancel.child_token())?;
    println!("Watching for changes (Ctrl-C to stop)");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    if let Some(line) = format_notice(&notice) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notice stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    if let Err(error) = listener.await {
        tracing::warn!(%error, "real-time listener ended abnormally");
    }
    tasks.shutdown().await;
    Ok(())
}
