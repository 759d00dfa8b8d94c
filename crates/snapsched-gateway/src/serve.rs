//! `snapsched serve`: the tick loop in the background, newline-delimited JSON
//! commands on stdin, one result frame per line on stdout.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use snapsched_core::config::MAX_COMMAND_FRAME_BYTES;
use snapsched_core::error::{Result, SnapSchedError};
use snapsched_protocol::frames::{CommandFrame, ResultFrame};
use snapsched_scheduler::TickEngine;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::dispatch::dispatch;

/// Serve stdin/stdout until EOF, Ctrl-C, or the tick engine stops on a fatal error.
pub async fn run(app: Arc<AppState>) -> Result<()> {
    serve_io(app, tokio::io::stdin(), tokio::io::stdout(), shutdown_signal()).await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupt received");
    } else {
        // No signal handler available; rely on stdin EOF.
        std::future::pending::<()>().await;
    }
}

async fn serve_io<R, W, S>(app: Arc<AppState>, input: R, mut output: W, stop: S) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: std::future::Future<Output = ()>,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Recovery opens the readiness gate; commands read meanwhile wait on it.
    let mut engine = {
        let app = Arc::clone(&app);
        let interval = Duration::from_secs(app.config.scheduler.tick_interval_secs);
        tokio::spawn(async move {
            let active = app.recover().await?;
            info!(active, "scheduler ready");
            TickEngine::new(Arc::clone(&app.client), interval)
                .run(shutdown_rx)
                .await
        })
    };

    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_COMMAND_FRAME_BYTES));
    tokio::pin!(stop);

    let outcome = loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let frame = handle_line(&app, &line).await;
                    write_frame(&mut output, &frame).await?;
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(limit = MAX_COMMAND_FRAME_BYTES, "command line too long, discarded");
                    let frame = ResultFrame::invalid(format!(
                        "line exceeds {MAX_COMMAND_FRAME_BYTES} bytes"
                    ));
                    write_frame(&mut output, &frame).await?;
                }
                Some(Err(LinesCodecError::Io(e))) => break Err(SnapSchedError::Io(e)),
                None => {
                    info!("stdin closed");
                    break Ok(());
                }
            },
            joined = &mut engine => {
                break match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(SnapSchedError::Internal(format!("scheduler stopped: {e}"))),
                    Err(e) => Err(SnapSchedError::Internal(format!("tick engine task failed: {e}"))),
                };
            }
            _ = &mut stop => break Ok(()),
        }
    };

    let _ = shutdown_tx.send(true);
    if !engine.is_finished() {
        match engine.await {
            Ok(Err(e)) => warn!("tick engine ended with error: {e}"),
            Err(e) => warn!("tick engine task failed: {e}"),
            Ok(Ok(())) => {}
        }
    }
    info!("serve loop stopped");
    outcome
}

async fn handle_line(app: &AppState, line: &str) -> ResultFrame {
    match serde_json::from_str::<CommandFrame>(line) {
        Ok(frame) => {
            debug!(command = frame.command.name(), id = ?frame.id, "command received");
            ResultFrame::new(frame.id, dispatch(app, frame.command).await)
        }
        Err(e) => {
            warn!(error = %e, "rejecting command frame");
            ResultFrame::invalid(e)
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(output: &mut W, frame: &ResultFrame) -> Result<()> {
    let mut json = serde_json::to_string(frame)?;
    json.push('\n');
    output.write_all(json.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
