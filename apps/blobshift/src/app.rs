//! Wires the filesystem stores to the transfer engine for one run.

use blobshift_copy::{
    ChunkedTransferEngine, FsBlobSource, FsObjectSink, ObjectTarget, TransferEvent,
    TransferResponse,
};
use blobshift_transfer::file_sha256_hex;

use crate::config::Config;

/// How the outcome is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Text,
    Json,
}

/// Runs the configured copy. Returns whether it succeeded.
pub async fn run(config: Config, output: Output) -> anyhow::Result<bool> {
    let request = config.request()?;

    if config.destination.create_bucket {
        let bucket = config.destination.root.join(&config.destination.bucket);
        tokio::fs::create_dir_all(&bucket).await?;
    }

    let source = FsBlobSource::new(&config.source.root);
    let sink = FsObjectSink::new(&config.destination.root);

    let mut engine = ChunkedTransferEngine::new();
    let mut events = engine
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let TransferEvent::PartUploaded {
                part_number,
                size,
                remaining,
            } = event
            {
                tracing::info!(part = part_number, size, remaining, "part uploaded");
            }
        }
    });

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling transfer");
            cancel.cancel();
        }
    });

    tracing::info!(
        source = %request.source,
        target = %request.target,
        part_size = request.part_size.get(),
        max_in_flight = request.options.max_in_flight,
        "starting transfer"
    );
    let mut response = engine.run(&request, &source, &sink).await;

    // Dropping the engine closes the event channel.
    drop(engine);
    let _ = reporter.await;

    if response.success && config.verify {
        response = verify(&sink, &request.target, response).await?;
    }

    print_response(&response, output)?;
    Ok(response.success)
}

/// Re-hashes the committed file. A mismatch turns the response into a
/// failure.
async fn verify(
    sink: &FsObjectSink,
    target: &ObjectTarget,
    response: TransferResponse,
) -> anyhow::Result<TransferResponse> {
    let path = sink.object_path(target)?;
    let actual = tokio::task::spawn_blocking(move || file_sha256_hex(&path))
        .await
        .map_err(|e| anyhow::anyhow!("task join error: {e}"))??;

    if response.digest.as_deref() == Some(actual.as_str()) {
        tracing::info!(digest = %actual, "destination digest verified");
        return Ok(response);
    }

    tracing::error!(
        expected = ?response.digest,
        actual = %actual,
        "destination digest mismatch"
    );
    Ok(response.digest_mismatch(&actual))
}

fn print_response(response: &TransferResponse, output: Output) -> anyhow::Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(response)?),
        Output::Text if response.success => {
            println!("copied to {}", response.location.as_deref().unwrap_or("-"));
            println!("sha256  {}", response.digest.as_deref().unwrap_or("-"));
            println!("{} parts, {} bytes", response.parts, response.bytes);
        }
        Output::Text => {
            eprintln!(
                "transfer failed: {}",
                response.message.as_deref().unwrap_or("unknown error")
            );
            if let Some(warning) = &response.warning {
                eprintln!("warning: {warning}");
            }
        }
    }
    Ok(())
}
