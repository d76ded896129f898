//! Anime metadata and votes

use crate::Result;
use crate::commands::context::CommandContext;
use crate::commands::{CommandKind, CommandOutcome};
use crate::protocol::http::{poster_url, xml_element};
use crate::protocol::{HttpOutcome, UdpOutcome, UdpRequest};
use crate::store::{AniDbRecord, RecordKind};
use log::{debug, info};
use serde_json::json;

/// Anime XML younger than this is not fetched again unless forced
pub const ANIME_REFRESH_AGE_HOURS: i64 = 4;

pub(super) async fn get_anime_http(
    ctx: &CommandContext,
    anime_id: u32,
    force_refresh: bool,
) -> Result<CommandOutcome> {
    let key = anime_id.to_string();
    if !force_refresh {
        if let Some(record) = ctx.records.get(RecordKind::Anime, &key).await? {
            if record.is_fresh(ctx.now(), chrono::Duration::hours(ANIME_REFRESH_AGE_HOURS)) {
                debug!("Anime {anime_id} was refreshed recently, skipping");
                return Ok(CommandOutcome::Completed);
            }
        }
    }

    let xml = match ctx.http.fetch_anime(anime_id).await {
        HttpOutcome::Success(xml) => xml,
        HttpOutcome::NotFound => {
            return Ok(CommandOutcome::failed(format!("anime {anime_id} not found")));
        }
        HttpOutcome::Banned { reason } => {
            return Ok(CommandOutcome::retry_now(format!("banned: {reason}")));
        }
        HttpOutcome::Error(error) => return Ok(CommandOutcome::from_protocol_error(error)),
    };

    let poster = poster_url(&xml);
    let data = json!({
        "title": xml_element(&xml, "title"),
        "type": xml_element(&xml, "type"),
        "episode_count": xml_element(&xml, "episodecount").and_then(|n| n.parse::<u32>().ok()),
        "poster": &poster,
        "xml": &xml,
    });
    ctx.records
        .save(&AniDbRecord::new(RecordKind::Anime, key, data, ctx.now()))
        .await?;
    info!("Stored anime {anime_id}");

    if let Some(url) = poster {
        ctx.enqueue(CommandKind::DownloadImage { url }).await?;
    }
    Ok(CommandOutcome::Completed)
}

pub(super) async fn vote_anime(
    ctx: &CommandContext,
    anime_id: u32,
    value: i32,
) -> Result<CommandOutcome> {
    let outcome = ctx.client.send(UdpRequest::vote_anime(anime_id, value)).await;
    match outcome {
        // 260 voted, 261 vote found, 262 vote updated, 263 vote revoked
        UdpOutcome::Success(response) if (260..=263).contains(&response.code) => {
            ctx.records
                .save(&AniDbRecord::new(
                    RecordKind::Vote,
                    anime_id.to_string(),
                    json!({ "value": value, "code": response.code }),
                    ctx.now(),
                ))
                .await?;
            Ok(CommandOutcome::Completed)
        }
        UdpOutcome::Success(response) => Ok(CommandOutcome::failed(format!(
            "{} {}",
            response.code, response.message
        ))),
        other => Ok(CommandOutcome::from_udp(other)),
    }
}
