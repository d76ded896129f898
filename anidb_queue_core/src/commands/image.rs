//! Poster downloads

use crate::Result;
use crate::commands::CommandOutcome;
use crate::commands::context::CommandContext;
use crate::error::{IoError, IoTarget};
use crate::protocol::HttpOutcome;
use log::debug;
use std::path::PathBuf;

/// Local file name for an image URL
pub(crate) fn image_file_name(url: &str) -> Option<&str> {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty() && *name != "..")
}

pub(super) async fn download_image(ctx: &CommandContext, url: &str) -> Result<CommandOutcome> {
    let Some(name) = image_file_name(url) else {
        return Ok(CommandOutcome::failed(format!("no file name in {url}")));
    };
    let target: PathBuf = ctx.images_dir.join(name);
    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        debug!("{} already downloaded", target.display());
        return Ok(CommandOutcome::Completed);
    }

    let bytes = match ctx.http.download(url).await {
        HttpOutcome::Success(bytes) => bytes,
        HttpOutcome::NotFound => return Ok(CommandOutcome::failed(format!("{url} not found"))),
        HttpOutcome::Banned { reason } => {
            return Ok(CommandOutcome::retry_now(format!("banned: {reason}")));
        }
        HttpOutcome::Error(error) => return Ok(CommandOutcome::from_protocol_error(error)),
    };

    let write = async {
        tokio::fs::create_dir_all(&ctx.images_dir).await?;
        // Renamed into place once complete
        let partial = target.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &target).await
    };
    if let Err(e) = write.await {
        let error = IoError::from_std(e).at(IoTarget::Image, &target);
        if error.is_permanent() {
            return Ok(CommandOutcome::failed(error.to_string()));
        }
        return Ok(CommandOutcome::retry(error.to_string()));
    }

    debug!("Saved {} ({} bytes)", target.display(), bytes.len());
    Ok(CommandOutcome::Completed)
}
