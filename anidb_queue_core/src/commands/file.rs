//! File lookups, hashing and release groups

use crate::Result;
use crate::commands::context::CommandContext;
use crate::commands::{CommandKind, CommandOutcome};
use crate::error::Error;
use crate::protocol::{UdpOutcome, UdpRequest};
use crate::store::{AniDbRecord, RecordKind};
use log::{info, warn};
use serde_json::json;
use std::path::Path;

fn id_field(fields: &[String], index: usize) -> Option<u32> {
    fields
        .get(index)
        .and_then(|field| field.parse::<u32>().ok())
        .filter(|id| *id != 0)
}

pub(super) async fn get_file(ctx: &CommandContext, size: u64, ed2k: &str) -> Result<CommandOutcome> {
    let response = match ctx.client.send(UdpRequest::file(size, ed2k)).await {
        UdpOutcome::Success(response) => response,
        other => return Ok(CommandOutcome::from_udp(other)),
    };

    // fid|aid|eid|gid|lid|...
    let anime_id = id_field(&response.fields, 1);
    let group_id = id_field(&response.fields, 3);
    let data = json!({
        "size": size,
        "file_id": id_field(&response.fields, 0),
        "anime_id": anime_id,
        "episode_id": id_field(&response.fields, 2),
        "group_id": group_id,
        "mylist_id": id_field(&response.fields, 4),
        "fields": response.fields,
    });
    ctx.records
        .save(&AniDbRecord::new(RecordKind::File, ed2k, data, ctx.now()))
        .await?;
    info!("Stored file info for {ed2k}");

    if let Some(anime_id) = anime_id {
        ctx.enqueue(CommandKind::GetAnimeHttp {
            anime_id,
            force_refresh: false,
        })
        .await?;
    }
    if let Some(group_id) = group_id {
        if ctx
            .records
            .get(RecordKind::Group, &group_id.to_string())
            .await?
            .is_none()
        {
            ctx.enqueue(CommandKind::GetReleaseGroup { group_id }).await?;
        }
    }
    Ok(CommandOutcome::Completed)
}

pub(super) async fn hash_file(ctx: &CommandContext, path: &Path) -> Result<CommandOutcome> {
    let hash = match ctx.hasher.hash(path).await {
        Ok(hash) => hash,
        Err(Error::Io(e)) if e.is_permanent() => {
            warn!("{e}");
            return Ok(CommandOutcome::failed(e.to_string()));
        }
        Err(Error::Io(e)) => return Ok(CommandOutcome::retry(e.to_string())),
        Err(e) => return Err(e),
    };

    let key = path.display().to_string();
    ctx.records
        .save(&AniDbRecord::new(
            RecordKind::Hash,
            key,
            json!({ "size": hash.size, "ed2k": hash.ed2k }),
            ctx.now(),
        ))
        .await?;
    info!("Hashed {}: {}", path.display(), hash.ed2k);

    ctx.enqueue(CommandKind::GetFile {
        size: hash.size,
        ed2k: hash.ed2k,
    })
    .await?;
    Ok(CommandOutcome::Completed)
}

pub(super) async fn get_release_group(
    ctx: &CommandContext,
    group_id: u32,
) -> Result<CommandOutcome> {
    let response = match ctx.client.send(UdpRequest::group(group_id)).await {
        UdpOutcome::Success(response) => response,
        other => return Ok(CommandOutcome::from_udp(other)),
    };

    // gid|rating|votes|acount|fcount|name|short|...
    let data = json!({
        "name": response.field(5),
        "short_name": response.field(6),
        "fields": response.fields,
    });
    ctx.records
        .save(&AniDbRecord::new(
            RecordKind::Group,
            group_id.to_string(),
            data,
            ctx.now(),
        ))
        .await?;
    Ok(CommandOutcome::Completed)
}
